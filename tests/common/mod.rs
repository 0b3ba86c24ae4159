#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use chroma_overlay::capture::FrameSignal;
use chroma_overlay::compositor::CompositeOutput;
use chroma_overlay::{DisplaySink, FrameSource, KeyerError, Result};
use image::{Rgba, RgbaImage};

/// Caller-side handle for swapping the frame a [`ScriptedSource`] serves.
#[derive(Clone, Default)]
pub struct FrameHandle(Rc<RefCell<Option<RgbaImage>>>);

impl FrameHandle {
    pub fn set(&self, frame: RgbaImage) {
        *self.0.borrow_mut() = Some(frame);
    }

    pub fn clear(&self) {
        *self.0.borrow_mut() = None;
    }
}

/// In-memory source that serves whatever its handle last set.
pub struct ScriptedSource {
    frame: FrameHandle,
    signal: Option<FrameSignal>,
}

impl ScriptedSource {
    pub fn new() -> (Self, FrameHandle) {
        let handle = FrameHandle::default();
        (
            Self {
                frame: handle.clone(),
                signal: None,
            },
            handle,
        )
    }

    pub fn with_signal(signal: FrameSignal) -> (Self, FrameHandle) {
        let (mut source, handle) = Self::new();
        source.signal = Some(signal);
        (source, handle)
    }
}

impl FrameSource for ScriptedSource {
    fn dimensions(&self) -> (u32, u32) {
        self.frame
            .0
            .borrow()
            .as_ref()
            .map(|f| f.dimensions())
            .unwrap_or((0, 0))
    }

    fn read_frame(&mut self) -> Result<Option<RgbaImage>> {
        Ok(self.frame.0.borrow().clone())
    }

    fn take_frame_signal(&mut self) -> Option<FrameSignal> {
        self.signal.take()
    }
}

/// Records every presented frame.
#[derive(Default)]
pub struct RecordingSink {
    pub presented: Vec<RgbaImage>,
    pub fail_next: bool,
}

impl DisplaySink for RecordingSink {
    fn present(&mut self, frame: &CompositeOutput) -> Result<()> {
        if self.fail_next {
            self.fail_next = false;
            return Err(KeyerError::output("display went away"));
        }
        self.presented.push(frame.flatten()?);
        Ok(())
    }
}

pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(rgba))
}

pub const KEY_GREEN: [u8; 4] = [0x11, 0xff, 0x05, 255];
pub const WHITE: [u8; 4] = [255, 255, 255, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];
