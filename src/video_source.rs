// src/video_source.rs
//
// Video capture over a live camera or a seekable file. The capture
// handle lives behind OnceRelease so that stop is idempotent: normal
// stop, error paths and process shutdown all funnel through the same
// take-once guard, and concurrent stops release the device exactly once.

use crate::types::Frame;
use anyhow::{bail, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// Take-once cell. `take()` hands the value to exactly one caller no
/// matter how many threads race on it.
pub struct OnceRelease<T> {
    inner: Mutex<Option<T>>,
}

impl<T> OnceRelease<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Some(value)),
        }
    }

    /// Run a closure against the held value, if it has not been taken.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_mut().map(f)
    }

    pub fn take(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.take()
    }

    pub fn is_taken(&self) -> bool {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    Camera(i32),
    File(String),
}

pub struct VideoSource {
    kind: SourceKind,
    cap: OnceRelease<VideoCapture>,
    pub fps: f64,
    pub total_frames: i64,
    current_frame: AtomicI64,
    paused: AtomicBool,
    next_frame_id: AtomicU64,
}

impl VideoSource {
    /// Open a live camera. Tries the default backend first, then V4L2
    /// before giving up (resource fallback, fatal only if both fail).
    pub fn open_camera(index: i32) -> Result<Self> {
        info!("Opening camera {}", index);

        let mut cap = VideoCapture::new(index, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            warn!("Camera {} failed on default backend, trying V4L2", index);
            cap = VideoCapture::new(index, videoio::CAP_V4L2)?;
        }
        if !cap.is_opened()? {
            bail!("Failed to open camera {}", index);
        }

        cap.set(videoio::CAP_PROP_FRAME_WIDTH, 640.0)?;
        cap.set(videoio::CAP_PROP_FRAME_HEIGHT, 480.0)?;
        cap.set(videoio::CAP_PROP_FPS, 30.0)?;

        Ok(Self {
            kind: SourceKind::Camera(index),
            cap: OnceRelease::new(cap),
            fps: 30.0,
            total_frames: 0,
            current_frame: AtomicI64::new(0),
            paused: AtomicBool::new(false),
            next_frame_id: AtomicU64::new(1),
        })
    }

    /// Open a seekable video file.
    pub fn open_file(path: &str) -> Result<Self> {
        info!("Opening video: {}", path);

        let cap = VideoCapture::from_file(path, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            bail!("Failed to open video file {}", path);
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let total_frames =
            VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i64;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            width, height, fps, total_frames
        );

        Ok(Self {
            kind: SourceKind::File(path.to_string()),
            cap: OnceRelease::new(cap),
            fps: if fps > 0.0 { fps } else { 30.0 },
            total_frames,
            current_frame: AtomicI64::new(0),
            paused: AtomicBool::new(false),
            next_frame_id: AtomicU64::new(1),
        })
    }

    /// Read the next frame, or None at end of stream / after stop.
    pub fn read_frame(&self) -> Result<Option<Frame>> {
        let read = self.cap.with(|cap| -> Result<Option<Mat>> {
            let mut mat = Mat::default();
            if !VideoCaptureTrait::read(cap, &mut mat)? || mat.empty() {
                return Ok(None);
            }
            Ok(Some(mat))
        });

        let mat = match read {
            Some(result) => match result? {
                Some(mat) => mat,
                None => return Ok(None),
            },
            // Capture already released
            None => return Ok(None),
        };

        let frame_index = self.current_frame.fetch_add(1, Ordering::SeqCst) + 1;
        let frame_id = self.next_frame_id.fetch_add(1, Ordering::SeqCst);
        let timestamp_ms = match self.kind {
            SourceKind::File(_) => (frame_index as f64 / self.fps) * 1000.0,
            SourceKind::Camera(_) => chrono::Utc::now().timestamp_millis() as f64,
        };

        Ok(Some(Frame {
            width: mat.cols(),
            height: mat.rows(),
            mat,
            frame_id,
            timestamp_ms,
        }))
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, SourceKind::File(_))
    }

    /// Pause playback. Only meaningful for file sources.
    pub fn pause(&self) -> bool {
        if self.is_file() {
            self.paused.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn resume(&self) -> bool {
        if self.is_file() {
            self.paused.store(false, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Seek to a frame index. Only valid for file sources.
    pub fn seek(&self, frame_index: i64) -> Result<bool> {
        if !self.is_file() {
            return Ok(false);
        }
        let clamped = frame_index.clamp(0, (self.total_frames - 1).max(0));
        let done = self
            .cap
            .with(|cap| cap.set(videoio::CAP_PROP_POS_FRAMES, clamped as f64))
            .transpose()?
            .unwrap_or(false);
        if done {
            self.current_frame.store(clamped, Ordering::SeqCst);
        }
        Ok(done)
    }

    pub fn current_frame(&self) -> i64 {
        self.current_frame.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> f32 {
        if self.total_frames <= 0 {
            return 0.0;
        }
        (self.current_frame() as f32 / self.total_frames as f32) * 100.0
    }

    /// Release the capture resource. Returns true for the call that
    /// actually performed the release, false for every later call.
    pub fn stop(&self) -> bool {
        match self.cap.take() {
            Some(mut cap) => {
                if let Err(e) = cap.release() {
                    warn!("Capture release failed: {}", e);
                }
                info!("Capture released");
                true
            }
            None => false,
        }
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_once_release_single_thread() {
        let guard = OnceRelease::new(42);
        assert!(!guard.is_taken());
        assert_eq!(guard.take(), Some(42));
        assert_eq!(guard.take(), None);
        assert!(guard.is_taken());
        assert!(guard.with(|_| ()).is_none());
    }

    #[test]
    fn test_once_release_exactly_once_concurrently() {
        // Double stop from racing threads must release exactly once.
        let guard = Arc::new(OnceRelease::new(String::from("capture")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.take().is_some())
            })
            .collect();

        let releases = handles
            .into_iter()
            .filter(|h| h.join().unwrap())
            .count();
        assert_eq!(releases, 1);
    }

    #[test]
    fn test_with_sees_value_until_taken() {
        let guard = OnceRelease::new(5);
        assert_eq!(guard.with(|v| *v * 2), Some(10));
        guard.take();
        assert_eq!(guard.with(|v| *v * 2), None);
    }
}
