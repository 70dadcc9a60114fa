//! Sequential chain of stages
//!
//! The output of stage *i* feeds stage *i+1*. A failure skips the remaining
//! stages for that chunk unless a later stage declares the `recover`
//! capability; the first such stage is offered the failing chunk and error
//! and processing resumes after it. Stages declaring `end` are notified with
//! every descendant result once the rest of the chain has completed for the
//! chunk they saw.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use tracing::debug;

use super::{defer, once, Capabilities, Proc, ProcRef, Res, ResStream};
use crate::chunk::Chunk;
use crate::concurrency::{FinishOnce, FirstErr};
use crate::error::Result;

struct Stage {
    proc: ProcRef,
    caps: Capabilities,
}

/// Stages applied in sequence
pub struct Chain {
    stages: Arc<[Stage]>,
    finished: FinishOnce,
}

impl Chain {
    /// Build a chain; capabilities are resolved here, once per stage
    pub fn new(stages: Vec<ProcRef>) -> Self {
        let stages: Vec<Stage> = stages
            .into_iter()
            .map(|proc| {
                let caps = proc.capabilities();
                Stage { proc, caps }
            })
            .collect();
        Self {
            stages: stages.into(),
            finished: FinishOnce::new(),
        }
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True for a chain without stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Continue `res` through `stages[idx..]`
fn run_from(stages: Arc<[Stage]>, idx: usize, res: Res) -> ResStream {
    match res {
        Res::Ok(chunk) => {
            let Some(stage) = stages.get(idx) else {
                return once(Res::Ok(chunk));
            };
            let proc = stage.proc.clone();
            let is_end = stage.caps.end;
            let next = stages.clone();
            let downstream = proc
                .process(chunk.clone())
                .flat_map(move |r| run_from(next.clone(), idx + 1, r))
                .boxed();

            if !is_end {
                return downstream;
            }
            defer(async move {
                let mut results: Vec<Res> = downstream.collect().await;
                if let Err(e) = proc.end(&chunk, &results).await {
                    results.push(Res::err(chunk, e));
                }
                stream::iter(results).boxed()
            })
        }
        Res::Err {
            chunk: Some(chunk),
            error,
        } => {
            let recoverer = stages
                .iter()
                .enumerate()
                .skip(idx)
                .find(|(_, s)| s.caps.recover)
                .map(|(j, s)| (j, s.proc.clone()));
            match recoverer {
                Some((j, proc)) => {
                    debug!(num = chunk.num(), stage = j, error = %error, "offering failure for recovery");
                    let next = stages.clone();
                    proc.recover(chunk, error)
                        .flat_map(move |r| run_from(next.clone(), j + 1, r))
                        .boxed()
                }
                None => once(Res::err(chunk, error)),
            }
        }
        orphan @ Res::Err { chunk: None, .. } => once(orphan),
    }
}

#[async_trait]
impl Proc for Chain {
    fn process(&self, chunk: Chunk) -> ResStream {
        run_from(self.stages.clone(), 0, Res::Ok(chunk))
    }

    async fn finish(&self) -> Result<()> {
        self.finished
            .run(|| async {
                let mut first = FirstErr::new();
                for stage in self.stages.iter() {
                    first.record(stage.proc.finish().await);
                }
                first.into_result()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Data;
    use crate::error::Error;
    use crate::pipeline::{collect, drive, once_async, Nop};
    use parking_lot::Mutex;

    /// Appends a byte to the payload
    struct Append(u8);

    impl Proc for Append {
        fn process(&self, chunk: Chunk) -> ResStream {
            let byte = self.0;
            once_async(async move {
                match chunk.bytes().await {
                    Ok(b) => {
                        let mut v = b.to_vec();
                        v.push(byte);
                        Res::Ok(chunk.with_data(v))
                    }
                    Err(e) => Res::err(chunk, e),
                }
            })
        }
    }

    /// Emits the chunk twice with distinct nums
    struct Fork;

    impl Proc for Fork {
        fn process(&self, chunk: Chunk) -> ResStream {
            let n = chunk.num();
            stream::iter(vec![
                Res::Ok(chunk.clone().with_num(n * 2)),
                Res::Ok(chunk.with_num(n * 2 + 1)),
            ])
            .boxed()
        }
    }

    struct Fail;

    impl Proc for Fail {
        fn process(&self, chunk: Chunk) -> ResStream {
            once(Res::err(chunk, Error::Internal("fail".into())))
        }
    }

    /// Replaces failures with a marker chunk
    struct Rescue;

    impl Proc for Rescue {
        fn process(&self, chunk: Chunk) -> ResStream {
            once(Res::Ok(chunk))
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                recover: true,
                end: false,
            }
        }

        fn recover(&self, chunk: Chunk, error: crate::error::Error) -> ResStream {
            chunk.meta().set("rescued", error.to_string());
            once(Res::Ok(chunk))
        }
    }

    /// Records what `end` observed
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(u64, Vec<u64>)>>,
    }

    #[async_trait]
    impl Proc for Recorder {
        fn process(&self, chunk: Chunk) -> ResStream {
            once(Res::Ok(chunk))
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                recover: false,
                end: true,
            }
        }

        async fn end(&self, chunk: &Chunk, results: &[Res]) -> Result<()> {
            let nums = results.iter().filter_map(|r| r.chunk()).map(Chunk::num).collect();
            self.seen.lock().push((chunk.num(), nums));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stages_apply_in_order() {
        let chain = Chain::new(vec![
            Arc::new(Append(b'b')) as ProcRef,
            Arc::new(Append(b'c')),
        ]);
        let out = drive(&chain, vec![Chunk::new(0, b"a".to_vec())]).await.unwrap();
        assert_eq!(out[0].bytes().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_failure_short_circuits() {
        let chain = Chain::new(vec![Arc::new(Fail) as ProcRef, Arc::new(Append(b'x'))]);
        let results = collect(chain.process(Chunk::new(0, Data::Empty))).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(results[0].chunk().unwrap().num(), 0);
    }

    #[tokio::test]
    async fn test_later_recoverer_rescues() {
        let chain = Chain::new(vec![
            Arc::new(Fail) as ProcRef,
            Arc::new(Append(b'x')),
            Arc::new(Rescue),
            Arc::new(Append(b'y')),
        ]);
        let out = drive(&chain, vec![Chunk::new(0, b"a".to_vec())]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes().await.unwrap(), "ay");
        assert!(out[0].meta().get("rescued").unwrap().contains("fail"));
    }

    #[tokio::test]
    async fn test_end_sees_all_descendants() {
        let recorder = Arc::new(Recorder::default());
        let chain = Chain::new(vec![recorder.clone() as ProcRef, Arc::new(Fork), Arc::new(Fork)]);
        let out = drive(&chain, vec![Chunk::new(1, Data::Empty)]).await.unwrap();
        assert_eq!(out.len(), 4);
        let seen = recorder.seen.lock().clone();
        assert_eq!(seen, vec![(1, vec![4, 5, 6, 7])]);
    }

    #[tokio::test]
    async fn test_finish_is_idempotent() {
        let chain = Chain::new(vec![Arc::new(Nop) as ProcRef]);
        assert!(chain.finish().await.is_ok());
        assert!(chain.finish().await.is_ok());
    }
}
