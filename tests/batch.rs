use cachegemm::{BatchShape, CacheGeometry, MatMulEngine, MatrixView, MatrixViewMut};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_matrix(len: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
}

#[test]
fn test_batch_matches_individual_products() {
    let shape = BatchShape {
        batch_size: 12,
        height: 17,
        depth: 23,
        width: 9,
    };
    let BatchShape { batch_size, height, depth, width } = shape;
    let mut rng = StdRng::seed_from_u64(1);
    let a = random_matrix(batch_size * height * depth, &mut rng);
    let b = random_matrix(batch_size * depth * width, &mut rng);
    let engine = MatMulEngine::new(CacheGeometry::new(512, 4096));

    let mut batched = vec![f32::NAN; batch_size * height * width];
    engine.multiply_matrix_by_matrix_batch(shape, &a, &b, &mut batched);

    for i in 0..batch_size {
        let mut single = vec![0.0f32; height * width];
        engine.multiply_matrix_by_matrix(
            MatrixView::contiguous(&a[i * height * depth..(i + 1) * height * depth], height, depth),
            MatrixView::contiguous(&b[i * depth * width..(i + 1) * depth * width], depth, width),
            &mut MatrixViewMut::contiguous(&mut single, height, width),
        );
        // Same kernel and block sizes, so results are bit-identical.
        assert_eq!(&batched[i * height * width..(i + 1) * height * width], &single[..]);
    }
}

#[test]
fn test_transposed_batch_matches_individual_products() {
    let shape = BatchShape {
        batch_size: 5,
        height: 8,
        depth: 31,
        width: 14,
    };
    let BatchShape { batch_size, height, depth, width } = shape;
    let mut rng = StdRng::seed_from_u64(2);
    let a = random_matrix(batch_size * height * depth, &mut rng);
    let b = random_matrix(batch_size * width * depth, &mut rng);
    let engine = MatMulEngine::default();

    let mut batched = vec![0.0f32; batch_size * height * width];
    engine.multiply_matrix_by_transposed_matrix_batch(shape, &a, &b, &mut batched);

    for i in 0..batch_size {
        let mut single = vec![0.0f32; height * width];
        engine.multiply_matrix_by_transposed_matrix(
            MatrixView::contiguous(&a[i * height * depth..(i + 1) * height * depth], height, depth),
            MatrixView::contiguous(&b[i * width * depth..(i + 1) * width * depth], width, depth),
            &mut MatrixViewMut::contiguous(&mut single, height, width),
        );
        assert_eq!(&batched[i * height * width..(i + 1) * height * width], &single[..]);
    }
}

#[test]
fn test_empty_batch_leaves_buffers() {
    let shape = BatchShape {
        batch_size: 0,
        height: 4,
        depth: 4,
        width: 4,
    };
    let mut c = vec![3.0f32; 16];
    MatMulEngine::default().multiply_matrix_by_matrix_batch(shape, &[], &[], &mut c);
    assert!(c.iter().all(|&x| x == 3.0));
}

#[test]
fn test_batch_ignores_trailing_result_space() {
    let shape = BatchShape {
        batch_size: 2,
        height: 2,
        depth: 2,
        width: 2,
    };
    let a = [1.0, 2.0, 3.0, 4.0, 1.0, 0.0, 0.0, 1.0];
    let b = [5.0, 6.0, 7.0, 8.0, 5.0, 6.0, 7.0, 8.0];
    let mut c = [-1.0f32; 10];

    MatMulEngine::default().multiply_matrix_by_matrix_batch(shape, &a, &b, &mut c);

    assert_eq!(c, [19.0, 22.0, 43.0, 50.0, 5.0, 6.0, 7.0, 8.0, -1.0, -1.0]);
}

#[test]
#[should_panic(expected = "first batch needs 24 floats")]
fn test_batch_rejects_short_first() {
    let shape = BatchShape {
        batch_size: 3,
        height: 2,
        depth: 4,
        width: 1,
    };
    let mut c = [0.0f32; 6];
    MatMulEngine::default().multiply_matrix_by_matrix_batch(shape, &[0.0; 23], &[0.0; 12], &mut c);
}
