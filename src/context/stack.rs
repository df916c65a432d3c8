//! The "current request" stack for nested dispatch.

use std::ops::{Deref, DerefMut};

use crate::http::Method;

/// Identity of one request on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub uri: String,
    pub method: Method,
    /// `true` for the request that started the interaction.
    pub initial: bool,
}

/// Requests currently executing, outermost first.
///
/// Frames are only added through [`RequestStack::push`], whose guard removes
/// the frame again when dropped, so the stack always mirrors the Rust call
/// stack of nested dispatches.
#[derive(Debug, Default)]
pub struct RequestStack {
    frames: Vec<Frame>,
}

impl RequestStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// The innermost executing request.
    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// The request enclosing the current one.
    pub fn parent(&self) -> Option<&Frame> {
        self.frames.iter().rev().nth(1)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Makes `frame` the current request until the returned guard is dropped.
    pub fn push(&mut self, frame: Frame) -> StackGuard<'_> {
        let depth = self.frames.len();
        self.frames.push(frame);
        StackGuard { stack: self, depth }
    }
}

/// Restores the previous current request on drop.
#[derive(Debug)]
pub struct StackGuard<'a> {
    stack: &'a mut RequestStack,
    depth: usize,
}

impl Deref for StackGuard<'_> {
    type Target = RequestStack;

    fn deref(&self) -> &RequestStack {
        self.stack
    }
}

impl DerefMut for StackGuard<'_> {
    fn deref_mut(&mut self) -> &mut RequestStack {
        self.stack
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.stack.frames.truncate(self.depth);
    }
}
