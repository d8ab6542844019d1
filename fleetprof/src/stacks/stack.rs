//! Call stacks, stored leaf-first.

use std::fmt;

use super::frame::{ErrorMarker, Frame};

/// An ordered sequence of frames.
///
/// Frames are kept leaf-to-root: index 0 is the frame that was executing when
/// the sample was taken. Root-to-leaf order only appears at the output
/// boundary (`Display` and the collapsed renderer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stack {
    frames: Vec<Frame>,
}

impl Stack {
    pub fn from_leaf_first(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn from_root_first<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = Frame>,
        I::IntoIter: DoubleEndedIterator,
    {
        Self { frames: frames.into_iter().rev().collect() }
    }

    /// Convenience for symbol-only stacks written root-first, mostly in tests.
    pub fn from_symbols<S: AsRef<str>>(root_first: &[S]) -> Self {
        Self::from_root_first(root_first.iter().map(|s| Frame::symbol(s.as_ref())))
    }

    /// The sentinel stack reporting a failed runtime profiler.
    pub fn error(marker: ErrorMarker) -> Self {
        Self { frames: vec![Frame::Error(marker)] }
    }

    pub fn leaf_first(&self) -> &[Frame] {
        &self.frames
    }

    pub fn root_first(&self) -> impl DoubleEndedIterator<Item = &Frame> {
        self.frames.iter().rev()
    }

    pub fn leaf(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Returns the marker if this is an error stack (a lone marker frame).
    pub fn error_marker(&self) -> Option<&ErrorMarker> {
        match self.frames.as_slice() {
            [Frame::Error(marker)] => Some(marker),
            _ => None,
        }
    }

    pub fn is_error_stack(&self) -> bool {
        self.error_marker().is_some()
    }

    /// Copy of this stack with `frame` pushed below the current leaf.
    #[must_use]
    pub fn with_leaf(&self, frame: Frame) -> Self {
        let mut frames = Vec::with_capacity(self.frames.len() + 1);
        frames.push(frame);
        frames.extend(self.frames.iter().cloned());
        Self { frames }
    }
}

/// Pure predicate recognising the error stack shape.
pub fn is_error_stack(stack: &Stack) -> bool {
    stack.is_error_stack()
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.root_first().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            frame.fmt(f)?;
        }
        Ok(())
    }
}
