// THEORY:
// Frame sources are the rig's only contact with the camera side of the world. The
// engine asks for one frame at a time through `FrameSource` and treats every
// failure except `SourceClosed` as a single lost frame.
//
// `DirectorySource` replays still images from disk, in file-name order. It is how
// the rig is exercised without hardware. `CameraSource` reads a live device through
// OpenCV and is only compiled with the `camera` feature.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use image::RgbImage;
use pack_inspector::FrameSource;
use pack_inspector::error::AcquisitionError;
use tracing::info;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

pub struct DirectorySource {
    frames: Vec<PathBuf>,
    next: usize,
    looping: bool,
    interval: Option<Duration>,
}

impl DirectorySource {
    pub fn open(dir: &Path, looping: bool) -> anyhow::Result<Self> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("reading frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        frames.sort();

        if frames.is_empty() {
            bail!("no image files in {}", dir.display());
        }
        info!(dir = %dir.display(), frames = frames.len(), looping, "replaying frames from disk");
        Ok(Self {
            frames,
            next: 0,
            looping,
            interval: None,
        })
    }

    /// Paces playback to roughly `fps` frames per second.
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.interval = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        self
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<RgbImage, AcquisitionError> {
        if self.next >= self.frames.len() {
            if !self.looping {
                return Err(AcquisitionError::SourceClosed);
            }
            self.next = 0;
        }
        let path = &self.frames[self.next];
        self.next += 1;

        if let Some(interval) = self.interval {
            std::thread::sleep(interval);
        }
        image::open(path)
            .map(|image| image.to_rgb8())
            .map_err(|err| AcquisitionError::Dropped(format!("{}: {err}", path.display())))
    }
}

#[cfg(feature = "camera")]
pub use camera::CameraSource;

#[cfg(feature = "camera")]
mod camera {
    use image::RgbImage;
    use opencv::{core::Mat, imgproc, prelude::*, videoio};
    use pack_inspector::FrameSource;
    use pack_inspector::error::AcquisitionError;

    pub struct CameraSource {
        capture: videoio::VideoCapture,
        frame: Mat,
    }

    impl CameraSource {
        pub fn open(index: i32, width: u32, height: u32) -> anyhow::Result<Self> {
            let mut capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)?;
            if !capture.is_opened()? {
                anyhow::bail!("camera {index} could not be opened");
            }
            capture.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
            capture.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;
            Ok(Self {
                capture,
                frame: Mat::default(),
            })
        }

        fn read_rgb(&mut self) -> opencv::Result<Option<RgbImage>> {
            if !self.capture.read(&mut self.frame)? || self.frame.empty() {
                return Ok(None);
            }
            let mut rgb = Mat::default();
            imgproc::cvt_color(&self.frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
            let bytes = rgb.data_bytes()?.to_vec();
            Ok(RgbImage::from_raw(rgb.cols() as u32, rgb.rows() as u32, bytes))
        }
    }

    impl FrameSource for CameraSource {
        fn next_frame(&mut self) -> Result<RgbImage, AcquisitionError> {
            if !self.capture.is_opened().unwrap_or(false) {
                return Err(AcquisitionError::SourceClosed);
            }
            match self.read_rgb() {
                Ok(Some(frame)) => Ok(frame),
                Ok(None) => Err(AcquisitionError::Dropped("camera returned no frame".into())),
                Err(err) => Err(AcquisitionError::Dropped(err.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_frame(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(4, 3, Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn replays_images_in_name_order_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "frame_002.png", 20);
        write_frame(dir.path(), "frame_001.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = DirectorySource::open(dir.path(), false).unwrap();
        assert_eq!(source.next_frame().unwrap().get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(source.next_frame().unwrap().get_pixel(0, 0), &Rgb([20, 20, 20]));
        assert!(matches!(source.next_frame(), Err(AcquisitionError::SourceClosed)));
    }

    #[test]
    fn looping_restarts_from_the_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "a.png", 1);
        let mut source = DirectorySource::open(dir.path(), true).unwrap();
        for _ in 0..3 {
            assert_eq!(source.next_frame().unwrap().get_pixel(0, 0), &Rgb([1, 1, 1]));
        }
    }

    #[test]
    fn unreadable_image_is_a_dropped_frame() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"nope").unwrap();
        let mut source = DirectorySource::open(dir.path(), false).unwrap();
        assert!(matches!(source.next_frame(), Err(AcquisitionError::Dropped(_))));
        assert!(matches!(source.next_frame(), Err(AcquisitionError::SourceClosed)));
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectorySource::open(dir.path(), false).is_err());
    }
}
