use crate::ops::dispatch::FnToPairTen64;
use crate::tensors::{Ten64, WithGrad};

pub fn cuda_matmul(
    a: &WithGrad<Ten64>,
    b: &WithGrad<Ten64>,
) -> Option<(Ten64, Box<FnToPairTen64>)> {
    // TODO: implement using `cust` crate
    super::wgpu::wgpu_matmul(a, b) // wgpu fallback
}
