//! GPU-accelerated tensor operations using WGPU.
//!
//! This module implements a matrix-multiplication compute kernel on the GPU
//! using WGPU + WGSL. It handles GPU context initialization (cached once via
//! `lazy_static`), buffer upload, compute dispatch, and readback.
//!
//! Device storage is `f32` (WGSL has no `f64`); values are converted on the
//! way in and out, so GPU results carry single-precision rounding relative to
//! the CPU path. The backward closure runs on the CPU: gradient matmuls at
//! these sizes do not amortize a second device round-trip.
//!
//! Every entry point returns `Option`; `None` means no usable adapter was
//! found and the dispatch layer falls back to CPU.

use crate::ops::dispatch::FnToPairTen64;
use crate::tensors::{Ten64, Tensor, WithGrad};
use wgpu::util::DeviceExt;

const MATMUL: &str = r#"
struct Dims {
    m: u32,
    k: u32,
    n: u32,
    _pad: u32,
}

@group(0) @binding(0) var<uniform> dims: Dims;
@group(0) @binding(1) var<storage, read> a: array<f32>;
@group(0) @binding(2) var<storage, read> b: array<f32>;
@group(0) @binding(3) var<storage, read_write> c: array<f32>;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.y;
    let col = gid.x;
    if (row >= dims.m || col >= dims.n) {
        return;
    }
    var acc = 0.0;
    for (var l = 0u; l < dims.k; l = l + 1u) {
        acc = acc + a[row * dims.k + l] * b[l * dims.n + col];
    }
    c[row * dims.n + col] = acc;
}
"#;

/// Basic wrapper for common GPU errors.
#[derive(Debug)]
pub enum GpuError {
    /// An error in requesting the adapter.
    Adapter(wgpu::RequestAdapterError),
    /// An error in requesting the GPU (device).
    Device(wgpu::RequestDeviceError),
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::Adapter(e) => write!(f, "Adapter error: {e}"),
            GpuError::Device(e) => write!(f, "Device error: {e}"),
        }
    }
}

impl std::error::Error for GpuError {}

/// Holds the WGPU device and queue used for executing compute pipelines.
///
/// Initialized once globally and reused for all operations via `lazy_static`.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// The submission queue for the device.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Initializes a new GPU context, selecting the default adapter and
    /// creating a device + queue.
    ///
    /// Uses `pollster::block_on` to drive WGPU's async setup synchronously.
    ///
    /// # Errors
    /// Returns `GpuError` if adapter or device acquisition fails.
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(GpuError::Adapter)?;
        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default()))
                .map_err(GpuError::Device)?;
        Ok(Self { device, queue })
    }
}

lazy_static::lazy_static! {
    static ref CONTEXT: Option<GpuContext> = GpuContext::new().ok();
}

fn pack_f32(data: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * 4);
    for &v in data {
        bytes.extend_from_slice(&(v as f32).to_le_bytes());
    }
    bytes
}

fn unpack_f32(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(4)
        .map(|c| f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect()
}

/// Runs `C = A × B` on the GPU, returning `None` when no device is available.
///
/// The forward product is computed in a single compute dispatch; the returned
/// backward closure computes `(∂L/∂a, ∂L/∂b)` on the CPU from captured copies
/// of the operands.
pub fn wgpu_matmul(a: &WithGrad<Ten64>, b: &WithGrad<Ten64>) -> Option<(Ten64, Box<FnToPairTen64>)> {
    let ctx = CONTEXT.as_ref()?;

    let m = a.value.shape[0];
    let k = a.value.shape[1];
    let n = b.value.shape[1];
    assert_eq!(k, b.value.shape[0], "matmul shape mismatch");

    let device = &ctx.device;

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("matmul"),
        source: wgpu::ShaderSource::Wgsl(MATMUL.into()),
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("matmul"),
        layout: None,
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });

    let mut dims = Vec::with_capacity(16);
    for v in [m as u32, k as u32, n as u32, 0u32] {
        dims.extend_from_slice(&v.to_le_bytes());
    }

    let dims_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("matmul dims"),
        contents: &dims,
        usage: wgpu::BufferUsages::UNIFORM,
    });
    let a_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("matmul a"),
        contents: &pack_f32(&a.value.data),
        usage: wgpu::BufferUsages::STORAGE,
    });
    let b_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("matmul b"),
        contents: &pack_f32(&b.value.data),
        usage: wgpu::BufferUsages::STORAGE,
    });

    let out_size = (m * n * 4) as u64;
    let out_buf = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("matmul out"),
        size: out_size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("matmul staging"),
        size: out_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("matmul"),
        layout: &pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry { binding: 0, resource: dims_buf.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 1, resource: a_buf.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 2, resource: b_buf.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 3, resource: out_buf.as_entire_binding() },
        ],
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(n.div_ceil(16) as u32, m.div_ceil(16) as u32, 1);
    }
    encoder.copy_buffer_to_buffer(&out_buf, 0, &staging, 0, out_size);
    ctx.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    let _ = device.poll(wgpu::PollType::Wait);
    rx.recv().ok()?.ok()?;

    let out_data = unpack_f32(&slice.get_mapped_range());
    staging.unmap();

    let out = Tensor::new(vec![m, n], out_data);

    let a_val = a.value.clone();
    let b_val = b.value.clone();

    let back = move |grad: &Ten64| {
        let mut ga = vec![0.0; m * k];
        for i in 0..m {
            for l in 0..k {
                let mut sum = 0.0;
                for j in 0..n {
                    sum += grad.data[i * n + j] * b_val.data[l * n + j];
                }
                ga[i * k + l] = sum;
            }
        }

        let mut gb = vec![0.0; k * n];
        for l in 0..k {
            for j in 0..n {
                let mut sum = 0.0;
                for i in 0..m {
                    sum += a_val.data[i * k + l] * grad.data[i * n + j];
                }
                gb[l * n + j] = sum;
            }
        }

        (Tensor::new(vec![m, k], ga), Tensor::new(vec![k, n], gb))
    };

    Some((out, Box::new(back)))
}
