//! Robust saving/loading of model parameters.
//!
//! # Parameter Snapshot Format
//!
//! This module provides minimal utilities for saving and loading a model's
//! parameter set in a compact binary form, so a fixed set of weights can be
//! reproduced across runs (the equivalence scenarios in the test suite rely
//! on this for known-weight cases).
//!
//! # Format Overview
//!
//! A snapshot stores one or more tensors in the following layout:
//!
//! ```text
//! ┌────────────┬────────────┬─────────────────────┐
//! │ Header     │ Tensor N   │ Tensor N+1 …        │
//! ├────────────┼────────────┼─────────────────────┤
//! │ "gmap"[4]  │ u64: ndim  │ u64: ndim           │
//! │ u8: count  │ [u64; ndim] shape                │
//! │            │ [f64; prod(shape)] data          │
//! └────────────┴──────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian. The `u8` count caps a snapshot
//! at 255 tensors, far above the eight the demonstration model carries.
//!
//! Loaded tensors pass through `briny`'s validation before they are trusted:
//! a snapshot whose shape product disagrees with its payload is rejected
//! rather than instantiated.

use crate::tensors::Tensor;
use briny::prelude::*;
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

const SNAPSHOT_MAGIC: &[u8; 4] = b"gmap";

/// Internal representation of a packed tensor.
struct PackedTensor {
    shape: Vec<u64>,
    data: Vec<f64>,
}

impl Validate for PackedTensor {
    fn validate(&self) -> Result<(), ValidationError> {
        let expected = self.shape.iter().product::<u64>() as usize;
        if self.data.len() != expected {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Save a parameter set to a snapshot file.
///
/// # Arguments
/// - `path`: Output file path.
/// - `tensors`: Slice of tensors to save, in canonical parameter order.
///
/// # Errors
/// - Returns an error if file I/O or write fails, or if more than 255
///   tensors are passed.
pub fn save_params(path: &str, tensors: &[Tensor<f64>]) -> Result<(), Box<dyn Error>> {
    if tensors.len() > u8::MAX as usize {
        return Err("too many tensors for one snapshot".into());
    }

    let mut file = BufWriter::new(File::create(path)?);

    // magic header and tensor count
    file.write_all(SNAPSHOT_MAGIC)?;
    file.write_all(&[tensors.len() as u8])?;

    for tensor in tensors {
        let dims = tensor.shape.len() as u64;
        file.write_all(&dims.to_le_bytes())?;

        for &dim in &tensor.shape {
            file.write_all(&(dim as u64).to_le_bytes())?;
        }

        for &val in &tensor.data {
            file.write_all(&val.to_le_bytes())?;
        }
    }

    Ok(())
}

/// Load a snapshot file containing multiple tensors.
///
/// # Arguments
/// - `path`: File path to read.
///
/// # Returns
/// - A `Vec<Tensor<f64>>` in the order the snapshot was written.
///
/// # Errors
/// - Fails if the file does not start with the snapshot magic, is truncated,
///   or a tensor's shape product disagrees with its payload.
pub fn load_params(path: &str) -> Result<Vec<Tensor<f64>>, Box<dyn Error>> {
    let mut file = BufReader::new(File::open(path)?);
    let mut buf8 = [0u8; 8];

    // magic header
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err("invalid magic header".into());
    }

    // tensor count
    let mut count = [0u8; 1];
    file.read_exact(&mut count)?;
    let count = count[0] as usize;

    let mut tensors = Vec::with_capacity(count);

    for _ in 0..count {
        file.read_exact(&mut buf8)?;
        let ndim = u64::from_le_bytes(buf8) as usize;

        let mut shape = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            file.read_exact(&mut buf8)?;
            shape.push(u64::from_le_bytes(buf8));
        }

        let size: usize = shape.iter().product::<u64>() as usize;
        let mut data = Vec::with_capacity(size);
        for _ in 0..size {
            file.read_exact(&mut buf8)?;
            data.push(f64::from_le_bytes(buf8));
        }

        let raw_tensor = PackedTensor { shape, data };
        let trusted = TrustedData::new(raw_tensor)?;
        let inner = trusted.into_inner();
        let shape_usize: Vec<usize> = inner.shape.iter().map(|&x| x as usize).collect();
        tensors.push(Tensor::new(shape_usize, inner.data));
    }

    Ok(tensors)
}
