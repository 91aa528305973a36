//! Capture rasters and their asynchronous readback.

use bytemuck::{Pod, Zeroable};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// Linear RGBA, one `f32` per channel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct LinearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl LinearColor {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// A GPU-side image the host can read back.
pub trait RenderTarget: Send + Sync {
    /// `(width, height)` in pixels.
    fn size(&self) -> (u32, u32);

    /// Row-major copy of the current contents.
    fn read_surface(&self) -> Vec<LinearColor>;
}

/// CPU-backed render target.
#[derive(Debug)]
pub struct ImageTarget {
    width: u32,
    height: u32,
    pixels: RwLock<Vec<LinearColor>>,
}

impl ImageTarget {
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            pixels: RwLock::new(vec![LinearColor::TRANSPARENT; len]),
        }
    }

    /// Pixels beyond `width * height` are ignored; missing ones stay transparent.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<LinearColor>) -> Self {
        let target = Self::new(width, height);
        target.write(&pixels);
        target
    }

    /// Interleaved RGBA floats, as produced by a float render target.
    pub fn from_rgba_f32(width: u32, height: u32, rgba: &[f32]) -> Self {
        let whole = rgba.len() / 4 * 4;
        let pixels: &[LinearColor] = bytemuck::cast_slice(&rgba[..whole]);
        Self::from_pixels(width, height, pixels.to_vec())
    }

    pub fn write(&self, pixels: &[LinearColor]) {
        let mut guard = self.pixels.write();
        let n = guard.len().min(pixels.len());
        guard[..n].copy_from_slice(&pixels[..n]);
    }

    pub fn set_pixel(&self, x: u32, y: u32, color: LinearColor) {
        if x < self.width && y < self.height {
            self.pixels.write()[(y * self.width + x) as usize] = color;
        }
    }
}

impl RenderTarget for ImageTarget {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_surface(&self) -> Vec<LinearColor> {
        self.pixels.read().clone()
    }
}

/// Receives `(success, buffers)`, buffers in the order the targets were given.
pub type ReadbackCallback = Box<dyn FnOnce(bool, Vec<Vec<LinearColor>>) + Send + 'static>;

/// Copies render targets to CPU memory without blocking the caller.
pub trait RasterReadback: Send + Sync {
    fn read_async(&self, targets: Vec<Arc<dyn RenderTarget>>, callback: ReadbackCallback);
}

/// Reads every target. The readback counts as failed when the first buffer is
/// empty or any buffer does not match its target's size.
fn read_targets(targets: &[Arc<dyn RenderTarget>]) -> (bool, Vec<Vec<LinearColor>>) {
    let buffers: Vec<_> = targets.iter().map(|t| t.read_surface()).collect();
    let sized = targets.iter().zip(&buffers).all(|(target, buffer)| {
        let (w, h) = target.size();
        buffer.len() == w as usize * h as usize
    });
    let success = buffers.first().map_or(false, |b| !b.is_empty()) && sized;
    (success, buffers)
}

/// Reads on the calling thread and invokes the callback before returning.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineReadback;

impl RasterReadback for InlineReadback {
    fn read_async(&self, targets: Vec<Arc<dyn RenderTarget>>, callback: ReadbackCallback) {
        let (success, buffers) = read_targets(&targets);
        callback(success, buffers);
    }
}

struct ReadbackJob {
    targets: Vec<Arc<dyn RenderTarget>>,
    callback: ReadbackCallback,
}

/// Reads on a dedicated thread standing in for the render thread; the
/// callback is handed to the rayon pool.
pub struct ThreadedReadback {
    jobs: Option<mpsc::UnboundedSender<ReadbackJob>>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadedReadback {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReadbackJob>();
        let thread = std::thread::Builder::new()
            .name("foliage-readback".into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    let (success, buffers) = read_targets(&job.targets);
                    tracing::trace!(success, buffers = buffers.len(), "Readback finished");
                    let callback = job.callback;
                    rayon::spawn(move || callback(success, buffers));
                }
            })?;
        Ok(Self {
            jobs: Some(tx),
            thread: Some(thread),
        })
    }
}

impl RasterReadback for ThreadedReadback {
    fn read_async(&self, targets: Vec<Arc<dyn RenderTarget>>, callback: ReadbackCallback) {
        let Some(jobs) = &self.jobs else {
            callback(false, Vec::new());
            return;
        };
        if let Err(mpsc::error::SendError(job)) = jobs.send(ReadbackJob { targets, callback }) {
            tracing::warn!("Readback thread is gone");
            (job.callback)(false, Vec::new());
        }
    }
}

impl Drop for ThreadedReadback {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Readback thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn rgba_floats_cast_to_pixels() {
        let target = ImageTarget::from_rgba_f32(2, 1, &[0.1, 0.2, 0.3, 1.0, 0.5, 0.5, 0.5, 0.0]);
        let pixels = target.read_surface();
        assert_eq!(pixels[0], LinearColor::new(0.1, 0.2, 0.3, 1.0));
        assert_eq!(pixels[1], LinearColor::new(0.5, 0.5, 0.5, 0.0));
    }

    #[test]
    fn inline_readback_validates_sizes() {
        let a: Arc<dyn RenderTarget> = Arc::new(ImageTarget::new(2, 2));
        let empty: Arc<dyn RenderTarget> = Arc::new(ImageTarget::new(0, 0));

        let (tx, rx) = std_mpsc::channel();
        let tx2 = tx.clone();
        InlineReadback.read_async(
            vec![a.clone(), a],
            Box::new(move |ok, buffers| tx.send((ok, buffers.len())).unwrap()),
        );
        InlineReadback.read_async(vec![empty], Box::new(move |ok, _| tx2.send((ok, 0)).unwrap()));

        assert_eq!(rx.recv().unwrap(), (true, 2));
        assert_eq!(rx.recv().unwrap(), (false, 0));
    }

    #[test]
    fn threaded_readback_completes_off_thread() {
        let readback = ThreadedReadback::spawn().unwrap();
        let target = Arc::new(ImageTarget::new(3, 2));
        target.set_pixel(2, 1, LinearColor::BLACK);

        let caller = std::thread::current().id();
        let (tx, rx) = std_mpsc::channel();
        readback.read_async(
            vec![target as Arc<dyn RenderTarget>],
            Box::new(move |ok, buffers| {
                tx.send((ok, buffers[0][5], std::thread::current().id())).unwrap();
            }),
        );

        let (ok, pixel, thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(ok);
        assert_eq!(pixel, LinearColor::BLACK);
        assert_ne!(thread, caller);
    }

    #[test]
    fn panicking_readback_thread_is_joined_on_drop() {
        struct Broken;
        impl RenderTarget for Broken {
            fn size(&self) -> (u32, u32) {
                (1, 1)
            }
            fn read_surface(&self) -> Vec<LinearColor> {
                panic!("surface lost");
            }
        }

        let readback = ThreadedReadback::spawn().unwrap();
        let (tx, rx) = std_mpsc::channel::<bool>();
        readback.read_async(
            vec![Arc::new(Broken) as Arc<dyn RenderTarget>],
            Box::new(move |ok, _| tx.send(ok).unwrap()),
        );
        drop(readback);
        // The callback died with the thread.
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
    }
}
