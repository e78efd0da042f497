//! Streams: reusable descriptions of sequential sample producers.
//!
//! A [`Stream`] never holds traversal state itself. Calling [`Stream::iter`] yields a fresh
//! [`Traversal`], an ordinary boxed iterator whose `next()` either produces the next value or
//! reports completion with `None`. Combinator expressions therefore form a signal graph
//! description that can be walked any number of times, independently.
//!
//! Three constructions are supported:
//! - **fixed**: values materialised ahead of time, shared behind an `Arc<[T]>`
//! - **deferred**: a constructor invoked once per traversal
//! - **shared**: one ongoing traversal that every consumer advances (see [`crate::ops::rand`])

use core::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::ops;

/// Values that can flow through a stream.
pub trait Value: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Value for T {}

/// One in-progress walk over a stream. Sequential and consumable once.
pub type Traversal<T = f64> = Box<dyn Iterator<Item = T> + Send>;

type Constructor<T> = dyn Fn() -> Traversal<T> + Send + Sync;

enum Source<T> {
    Fixed(Arc<[T]>),
    Deferred(Arc<Constructor<T>>),
    Shared(Arc<Mutex<Traversal<T>>>),
}

/// A reusable, possibly infinite sequence description.
pub struct Stream<T = f64> {
    source: Source<T>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        let source = match &self.source {
            Source::Fixed(values) => Source::Fixed(Arc::clone(values)),
            Source::Deferred(ctor) => Source::Deferred(Arc::clone(ctor)),
            Source::Shared(cell) => Source::Shared(Arc::clone(cell)),
        };
        Self { source }
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Fixed(values) => f.debug_struct("Stream::fixed").field("len", &values.len()).finish(),
            Source::Deferred(_) => f.write_str("Stream::deferred"),
            Source::Shared(_) => f.write_str("Stream::shared"),
        }
    }
}

impl<T: Value> Stream<T> {
    /// A finite stream over values materialised ahead of time.
    pub fn fixed(values: impl Into<Arc<[T]>>) -> Self {
        Self { source: Source::Fixed(values.into()) }
    }

    #[inline]
    pub fn from_vec(values: Vec<T>) -> Self {
        Self::fixed(values)
    }

    /// A stream whose traversals are built by `ctor`, once per [`iter`](Self::iter) call.
    pub fn deferred<F, I>(ctor: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Iterator<Item = T> + Send + 'static,
    {
        let ctor: Arc<Constructor<T>> = Arc::new(move || Box::new(ctor()) as Traversal<T>);
        Self { source: Source::Deferred(ctor) }
    }

    /// Wrap a single traversal so that every consumer pulls from the same cursor.
    ///
    /// Shared streams are not re-instantiable: `iter()` hands out views of one ongoing
    /// sequence, and values pulled through one view are gone for all others.
    pub fn shared<I>(traversal: I) -> Self
    where
        I: Iterator<Item = T> + Send + 'static,
    {
        let boxed: Traversal<T> = Box::new(traversal);
        Self { source: Source::Shared(Arc::new(Mutex::new(boxed))) }
    }

    /// Start one traversal of this stream now and share it.
    pub fn share(&self) -> Self {
        Self::shared(self.iter())
    }

    /// Begin a fresh traversal (or, for shared streams, a view of the shared one).
    pub fn iter(&self) -> Traversal<T> {
        match &self.source {
            Source::Fixed(values) => Box::new(FixedIter { values: Arc::clone(values), pos: 0 }),
            Source::Deferred(ctor) => ctor(),
            Source::Shared(cell) => Box::new(SharedIter { cell: Arc::clone(cell) }),
        }
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        matches!(self.source, Source::Shared(_))
    }

    /// Collect at most `n` values from a fresh traversal.
    pub fn first(&self, n: usize) -> Vec<T> {
        self.iter().take(n).collect()
    }
}

impl<T: Value> From<Vec<T>> for Stream<T> {
    fn from(values: Vec<T>) -> Self {
        Self::fixed(values)
    }
}

impl<T: Value> From<&Stream<T>> for Stream<T> {
    fn from(stream: &Stream<T>) -> Self {
        stream.clone()
    }
}

impl From<f64> for Stream {
    fn from(x: f64) -> Self {
        SignalInput::Constant(x).into_stream()
    }
}

impl<'a, T: Value> IntoIterator for &'a Stream<T> {
    type Item = T;
    type IntoIter = Traversal<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

struct FixedIter<T> {
    values: Arc<[T]>,
    pos: usize,
}

impl<T: Clone> Iterator for FixedIter<T> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        let v = self.values.get(self.pos)?.clone();
        self.pos += 1;
        Some(v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.values.len().saturating_sub(self.pos);
        (left, Some(left))
    }
}

struct SharedIter<T> {
    cell: Arc<Mutex<Traversal<T>>>,
}

impl<T> Iterator for SharedIter<T> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        // A panic in another consumer leaves the traversal usable; keep pulling.
        self.cell.lock().unwrap_or_else(PoisonError::into_inner).next()
    }
}

// ------------------------------- Input normalisation -------------------------------

/// Combinator argument: either a bare number or a stream.
///
/// Constants are lifted to infinite constant streams by [`SignalInput::into_stream`] at
/// the combinator boundary.
#[derive(Clone, Debug)]
pub enum SignalInput {
    Constant(f64),
    Stream(Stream),
}

impl SignalInput {
    pub fn into_stream(self) -> Stream {
        match self {
            SignalInput::Constant(x) => ops::constant(x),
            SignalInput::Stream(s) => s,
        }
    }
}

impl From<f64> for SignalInput {
    fn from(x: f64) -> Self {
        SignalInput::Constant(x)
    }
}

impl From<Stream> for SignalInput {
    fn from(s: Stream) -> Self {
        SignalInput::Stream(s)
    }
}

impl From<&Stream> for SignalInput {
    fn from(s: &Stream) -> Self {
        SignalInput::Stream(s.clone())
    }
}

impl From<SignalInput> for Stream {
    fn from(input: SignalInput) -> Self {
        input.into_stream()
    }
}
