use crate::error::RepoError;
use futures_core::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

type BoxedItems<T> = Pin<Box<dyn Stream<Item = Result<T, RepoError>> + Send>>;

/// A single-consumption asynchronous result stream.
///
/// `take`/`skip`/`paged` each consume `self` and return a new stream, so the
/// ordinary case — build a `QueryStream`, reshape it once, iterate it to
/// completion — is enforced by ownership alone. The `spent` flag catches the
/// one case ownership can't: a caller holding the stream behind a shared
/// handle (`Arc<Mutex<QueryStream<T>>>`) who polls it directly and then
/// tries to reshape the same handle with a combinator. Once a `QueryStream`
/// has yielded its first item — whether via direct polling or via a
/// combinator — every other attempt to claim it fails with
/// `RepoError::StreamAlreadyConsumed`.
pub struct QueryStream<T> {
    inner: BoxedItems<T>,
    spent: Arc<AtomicBool>,
    claimed_by_self: bool,
}

impl<T: Send + 'static> QueryStream<T> {
    pub fn new(stream: impl Stream<Item = Result<T, RepoError>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
            spent: Arc::new(AtomicBool::new(false)),
            claimed_by_self: false,
        }
    }

    /// Atomically claim the stream for a given mode of consumption. Fails
    /// if some other claim (direct poll or a prior combinator call) already
    /// succeeded.
    fn claim(&self) -> Result<(), RepoError> {
        if self.spent.swap(true, Ordering::SeqCst) {
            Err(RepoError::StreamAlreadyConsumed)
        } else {
            Ok(())
        }
    }

    /// Yield at most `n` items.
    pub fn take(self, n: usize) -> Result<QueryStream<T>, RepoError> {
        self.claim()?;
        Ok(QueryStream::new(self.inner.take(n)))
    }

    /// Skip the first `n` items, then yield the rest.
    pub fn skip(self, n: usize) -> Result<QueryStream<T>, RepoError> {
        self.claim()?;
        Ok(QueryStream::new(self.inner.skip(n)))
    }

    /// Chunk the stream into pages of up to `page_size` items. The final
    /// page may be shorter; an upstream error ends the stream after
    /// surfacing that error as the current page's result.
    pub fn paged(self, page_size: usize) -> Result<QueryStream<Vec<T>>, RepoError> {
        self.claim()?;
        if page_size == 0 {
            return Ok(QueryStream::new(futures_util::stream::empty()));
        }
        Ok(QueryStream::new(Paged {
            inner: self.inner,
            page_size,
            partial: Vec::new(),
            done: false,
        }))
    }

    /// Drain the stream into a `Vec`, stopping at the first error.
    pub async fn collect_all(self) -> Result<Vec<T>, RepoError> {
        self.claim()?;
        let mut out = Vec::new();
        let mut inner = self.inner;
        while let Some(item) = inner.next().await {
            out.push(item?);
        }
        Ok(out)
    }
}

impl<T> Stream for QueryStream<T> {
    type Item = Result<T, RepoError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.claimed_by_self {
            if this.spent.swap(true, Ordering::SeqCst) {
                return Poll::Ready(Some(Err(RepoError::StreamAlreadyConsumed)));
            }
            this.claimed_by_self = true;
        }
        this.inner.as_mut().poll_next(cx)
    }
}

struct Paged<T> {
    inner: BoxedItems<T>,
    page_size: usize,
    partial: Vec<T>,
    done: bool,
}

impl<T> Stream for Paged<T> {
    type Item = Result<Vec<T>, RepoError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(item))) => {
                    this.partial.push(item);
                    if this.partial.len() == this.page_size {
                        return Poll::Ready(Some(Ok(std::mem::take(&mut this.partial))));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if this.partial.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(std::mem::take(&mut this.partial))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn ok_stream(items: Vec<i32>) -> QueryStream<i32> {
        QueryStream::new(stream::iter(items.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn take_limits_output() {
        let s = ok_stream(vec![1, 2, 3, 4, 5]).take(2).unwrap();
        let out = s.collect_all().await.unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn skip_drops_prefix() {
        let s = ok_stream(vec![1, 2, 3, 4]).skip(2).unwrap();
        let out = s.collect_all().await.unwrap();
        assert_eq!(out, vec![3, 4]);
    }

    #[tokio::test]
    async fn paged_chunks_and_keeps_remainder() {
        let s = ok_stream(vec![1, 2, 3, 4, 5]).paged(2).unwrap();
        let pages = s.collect_all().await.unwrap();
        assert_eq!(pages, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test]
    async fn paged_zero_yields_no_pages() {
        let s = ok_stream(vec![1, 2, 3]).paged(0).unwrap();
        let pages = s.collect_all().await.unwrap();
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn paged_stops_at_first_error() {
        let items = vec![Ok(1), Ok(2), Err(RepoError::StreamAlreadyConsumed), Ok(4)];
        let s = QueryStream::new(stream::iter(items)).paged(3).unwrap();
        let mut s = Box::pin(s);
        let first = s.next().await.unwrap();
        assert!(first.is_err());
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn combinator_after_direct_poll_is_rejected() {
        let mut s = ok_stream(vec![1, 2, 3]);
        let _ = s.next().await;
        let err = s.take(1).unwrap_err();
        assert!(matches!(err, RepoError::StreamAlreadyConsumed));
    }

    #[tokio::test]
    async fn second_combinator_claim_is_rejected() {
        let s = ok_stream(vec![1, 2, 3]);
        let s = s.take(2).unwrap();
        // `s` was already reshaped once; attempting a second reshape on the
        // *original* handle is impossible under ownership (it was moved),
        // but the new stream itself can still be claimed exactly once more.
        let out = s.paged(1).unwrap().collect_all().await.unwrap();
        assert_eq!(out, vec![vec![1], vec![2]]);
    }
}
