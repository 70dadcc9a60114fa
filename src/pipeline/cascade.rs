//! Failover across equivalent stages
//!
//! Alternatives are tried in order. Each attempt is drained completely; the
//! first attempt without an error wins and only its output is emitted.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use tracing::debug;

use super::{defer, once, Proc, ProcRef, Res, ResStream};
use crate::chunk::Chunk;
use crate::concurrency::{join_first_err, FinishOnce};
use crate::error::{Error, Result};

/// Tries alternatives until one succeeds
pub struct Cascade {
    alternatives: Arc<[ProcRef]>,
    finished: FinishOnce,
}

impl Cascade {
    /// Create a cascade over `alternatives`, tried in the given order
    pub fn new(alternatives: Vec<ProcRef>) -> Self {
        Self {
            alternatives: alternatives.into(),
            finished: FinishOnce::new(),
        }
    }
}

#[async_trait]
impl Proc for Cascade {
    fn process(&self, chunk: Chunk) -> ResStream {
        if self.alternatives.is_empty() {
            return once(Res::err(chunk, Error::NoAlternatives));
        }
        let alternatives = self.alternatives.clone();
        defer(async move {
            let mut last = Vec::new();
            for (i, alt) in alternatives.iter().enumerate() {
                let results: Vec<Res> = alt.process(chunk.clone()).collect().await;
                match results.iter().find_map(Res::error) {
                    None => return stream::iter(results).boxed(),
                    Some(e) => {
                        debug!(num = chunk.num(), alternative = i, error = %e, "cascade alternative failed");
                    }
                }
                last = results;
            }
            stream::iter(last).boxed()
        })
    }

    async fn finish(&self) -> Result<()> {
        self.finished
            .run(|| join_first_err(self.alternatives.iter().map(|a| a.finish())))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Data;
    use crate::pipeline::collect;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits a partial success then fails, counting calls
    struct Flaky {
        calls: AtomicUsize,
    }

    impl Proc for Flaky {
        fn process(&self, chunk: Chunk) -> ResStream {
            self.calls.fetch_add(1, Ordering::SeqCst);
            stream::iter(vec![
                Res::Ok(chunk.clone().with_num(99)),
                Res::err(chunk, Error::Internal("flaky".into())),
            ])
            .boxed()
        }
    }

    struct Tag(&'static str);

    impl Proc for Tag {
        fn process(&self, chunk: Chunk) -> ResStream {
            chunk.meta().set("by", self.0);
            once(Res::Ok(chunk))
        }
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let flaky = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let cascade = Cascade::new(vec![
            flaky.clone() as ProcRef,
            Arc::new(Tag("second")),
            Arc::new(Tag("third")),
        ]);
        let results = collect(cascade.process(Chunk::new(1, Data::Empty))).await;

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 1);
        let chunk = results[0].chunk().unwrap();
        assert_eq!(chunk.num(), 1);
        assert_eq!(chunk.meta().get("by").as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_all_fail_emits_last_attempt() {
        let cascade = Cascade::new(vec![
            Arc::new(Flaky {
                calls: AtomicUsize::new(0),
            }) as ProcRef,
            Arc::new(Flaky {
                calls: AtomicUsize::new(0),
            }),
        ]);
        let results = collect(cascade.process(Chunk::new(1, Data::Empty))).await;
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn test_empty_cascade_fails() {
        let cascade = Cascade::new(Vec::new());
        let results = collect(cascade.process(Chunk::new(1, Data::Empty))).await;
        assert!(matches!(results[0].error(), Some(Error::NoAlternatives)));
        assert!(cascade.finish().await.is_ok());
    }
}
