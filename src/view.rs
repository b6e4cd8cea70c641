//! Row-major matrix views over caller-owned `f32` buffers.
//!
//! A view is a `height × width` rectangle whose rows start `row_size`
//! floats apart. Row padding (`row_size > width`) is never read or written.
//! Every view checks at construction that the rectangle lies inside its
//! buffer, so later indexing needs no further bounds arithmetic.

use crate::error::{validation_error, Result};

/// Minimum buffer length holding a `height × width` rectangle with rows
/// `row_size` apart. The last row needs no padding tail.
///
/// Only called on shapes that already passed `check_shape`.
#[inline]
pub(crate) fn required_len(height: usize, width: usize, row_size: usize) -> usize {
    if height == 0 || width == 0 {
        0
    } else {
        (height - 1) * row_size + width
    }
}

fn check_shape(len: usize, height: usize, width: usize, row_size: usize) -> Result<()> {
    if width > row_size {
        return Err(validation_error(format!(
            "width {width} exceeds row size {row_size}"
        )));
    }
    let required = (height.saturating_sub(1))
        .checked_mul(row_size)
        .and_then(|rows| rows.checked_add(width))
        .ok_or_else(|| validation_error("matrix extent overflows usize"))?;
    let required = if height == 0 || width == 0 { 0 } else { required };
    if required > len {
        return Err(validation_error(format!(
            "{height}x{width} matrix with row size {row_size} needs {required} floats, buffer holds {len}"
        )));
    }
    Ok(())
}

/// Read-only matrix view.
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a> {
    data: &'a [f32],
    height: usize,
    width: usize,
    row_size: usize,
}

impl<'a> MatrixView<'a> {
    /// Creates a view, panicking if the rectangle does not fit `data`.
    pub fn new(data: &'a [f32], height: usize, width: usize, row_size: usize) -> Self {
        match Self::try_new(data, height, width, row_size) {
            Ok(view) => view,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_new(data: &'a [f32], height: usize, width: usize, row_size: usize) -> Result<Self> {
        check_shape(data.len(), height, width, row_size)?;
        Ok(MatrixView {
            data,
            height,
            width,
            row_size,
        })
    }

    /// View with no row padding.
    pub fn contiguous(data: &'a [f32], height: usize, width: usize) -> Self {
        Self::new(data, height, width, width)
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    /// The backing buffer, trimmed to the last element of the rectangle.
    #[inline]
    pub fn data(&self) -> &'a [f32] {
        &self.data[..required_len(self.height, self.width, self.row_size)]
    }

    /// Row `i`, exactly `width` floats.
    #[inline]
    pub fn row(&self, i: usize) -> &'a [f32] {
        assert!(i < self.height, "row {i} out of bounds (height {})", self.height);
        let start = i * self.row_size;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        assert!(col < self.width, "column {col} out of bounds (width {})", self.width);
        self.row(row)[col]
    }
}

/// Writable matrix view, used for destinations.
#[derive(Debug)]
pub struct MatrixViewMut<'a> {
    data: &'a mut [f32],
    height: usize,
    width: usize,
    row_size: usize,
}

impl<'a> MatrixViewMut<'a> {
    /// Creates a view, panicking if the rectangle does not fit `data`.
    ///
    /// `data.len()` is the destination capacity: it must reach
    /// `(height - 1) * row_size + width`, one float less is rejected.
    pub fn new(data: &'a mut [f32], height: usize, width: usize, row_size: usize) -> Self {
        match Self::try_new(data, height, width, row_size) {
            Ok(view) => view,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_new(
        data: &'a mut [f32],
        height: usize,
        width: usize,
        row_size: usize,
    ) -> Result<Self> {
        check_shape(data.len(), height, width, row_size)?;
        Ok(MatrixViewMut {
            data,
            height,
            width,
            row_size,
        })
    }

    /// View with no row padding.
    pub fn contiguous(data: &'a mut [f32], height: usize, width: usize) -> Self {
        Self::new(data, height, width, width)
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    pub fn as_view(&self) -> MatrixView<'_> {
        MatrixView {
            data: &*self.data,
            height: self.height,
            width: self.width,
            row_size: self.row_size,
        }
    }

    /// Row `i`, exactly `width` floats.
    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        assert!(i < self.height, "row {i} out of bounds (height {})", self.height);
        let start = i * self.row_size;
        &mut self.data[start..start + self.width]
    }

    /// Sub-slice starting at `(row, col)` and ending at the last element of
    /// the rectangle. Handed to micro-kernels together with `row_size`.
    #[inline]
    pub(crate) fn tail_from(&mut self, row: usize, col: usize) -> &mut [f32] {
        debug_assert!(row < self.height && col < self.width);
        let end = required_len(self.height, self.width, self.row_size);
        &mut self.data[row * self.row_size + col..end]
    }

    /// Zeroes the rectangle, leaving row padding untouched.
    pub fn fill_zero(&mut self) {
        for i in 0..self.height {
            self.row_mut(i).fill(0.0);
        }
    }
}

/// Storage convention of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    /// The view holds the logical matrix.
    Normal,
    /// The view holds the transpose of the logical matrix.
    Transposed,
}

/// An operand: a view plus how to read it.
#[derive(Debug, Clone, Copy)]
pub struct Operand<'a> {
    pub view: MatrixView<'a>,
    pub transpose: Transpose,
}

impl<'a> Operand<'a> {
    pub fn normal(view: MatrixView<'a>) -> Self {
        Operand {
            view,
            transpose: Transpose::Normal,
        }
    }

    pub fn transposed(view: MatrixView<'a>) -> Self {
        Operand {
            view,
            transpose: Transpose::Transposed,
        }
    }

    /// Rows of the logical matrix.
    #[inline]
    pub fn rows(&self) -> usize {
        match self.transpose {
            Transpose::Normal => self.view.height(),
            Transpose::Transposed => self.view.width(),
        }
    }

    /// Columns of the logical matrix.
    #[inline]
    pub fn cols(&self) -> usize {
        match self.transpose {
            Transpose::Normal => self.view.width(),
            Transpose::Transposed => self.view.height(),
        }
    }
}
