use adapter::{
    CdcMechanism, ChangeBatch, ChangeStream, DataOps, Error, ReplicationOps, Row, StreamPage,
    StreamParams,
};
use cdc::{ApplyOptions, CdcSource, CheckpointStore, MemoryCheckpointStore, SourceConfig, SourceState};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use usm::DatabaseType;

/// A change feed backed by a vector of (position, event) pairs. Fetches
/// never consume; `ack` records what the source considered applied.
#[derive(Default)]
struct Feed {
    events: Mutex<Vec<(u64, Row)>>,
    acked: Mutex<Vec<String>>,
}

impl Feed {
    fn push(&self, position: u64, n: i64) {
        let raw: Row = [
            ("operation".to_string(), json!("insert")),
            ("table_name".to_string(), json!("t")),
            ("data".to_string(), json!({ "n": n })),
            ("scn".to_string(), json!(position.to_string())),
        ]
        .into_iter()
        .collect();
        self.events.lock().unwrap().push((position, raw));
    }
}

struct FeedStream {
    feed: Arc<Feed>,
}

#[async_trait::async_trait]
impl ChangeStream for FeedStream {
    fn mechanism(&self) -> CdcMechanism {
        CdcMechanism::Stream
    }

    async fn fetch_changes(&mut self, from: Option<&str>, max: usize) -> Result<ChangeBatch, Error> {
        let from: u64 = from.and_then(|f| f.parse().ok()).unwrap_or(0);
        let events = self.feed.events.lock().unwrap();
        let changes: Vec<Row> = events
            .iter()
            .filter(|(position, _)| *position > from)
            .take(max)
            .map(|(_, raw)| raw.clone())
            .collect();
        let next_position = events
            .iter()
            .filter(|(position, _)| *position > from)
            .take(max)
            .map(|(position, _)| *position)
            .max()
            .map(|position| position.to_string());
        Ok(ChangeBatch {
            changes,
            next_position,
        })
    }

    async fn ack(&mut self, position: &str) -> Result<(), Error> {
        self.feed.acked.lock().unwrap().push(position.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

struct FeedReplication {
    feed: Arc<Feed>,
}

#[async_trait::async_trait]
impl ReplicationOps for FeedReplication {
    fn mechanism(&self) -> CdcMechanism {
        CdcMechanism::Stream
    }

    async fn current_position(&self) -> Result<String, Error> {
        let events = self.feed.events.lock().unwrap();
        Ok(events
            .iter()
            .map(|(position, _)| *position)
            .max()
            .unwrap_or(0)
            .to_string())
    }

    async fn open_change_stream(
        &self,
        _source_id: &str,
        _table: Option<&str>,
    ) -> Result<Box<dyn ChangeStream>, Error> {
        Ok(Box::new(FeedStream {
            feed: self.feed.clone(),
        }))
    }
}

/// A target that records every executed statement. Optionally panics on
/// the first call to exercise apply isolation.
struct Target {
    executed: Mutex<Vec<(String, Vec<Value>)>>,
    panic_once: AtomicBool,
}

impl Target {
    fn new() -> Arc<Target> {
        Arc::new(Target {
            executed: Mutex::new(Vec::new()),
            panic_once: AtomicBool::new(false),
        })
    }

    fn applied_values(&self) -> Vec<i64> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, params)| params.first().and_then(Value::as_i64))
            .collect()
    }
}

#[async_trait::async_trait]
impl DataOps for Target {
    async fn fetch(&self, _table: &str, _limit: Option<u64>) -> Result<Vec<Row>, Error> {
        Ok(vec![])
    }
    async fn fetch_with_columns(
        &self,
        _table: &str,
        _columns: &[String],
        _limit: Option<u64>,
    ) -> Result<Vec<Row>, Error> {
        Ok(vec![])
    }
    async fn insert(&self, _table: &str, _rows: &[Row]) -> Result<u64, Error> {
        Ok(0)
    }
    async fn update(
        &self,
        _table: &str,
        _rows: &[Row],
        _where_columns: &[String],
    ) -> Result<u64, Error> {
        Ok(0)
    }
    async fn upsert(
        &self,
        _table: &str,
        _rows: &[Row],
        _unique_columns: &[String],
    ) -> Result<u64, Error> {
        Ok(0)
    }
    async fn delete(&self, _table: &str, _conditions: &Row) -> Result<u64, Error> {
        Ok(0)
    }
    async fn stream(&self, _params: StreamParams) -> Result<StreamPage, Error> {
        Ok(StreamPage {
            rows: vec![],
            has_more: false,
            next_cursor: None,
        })
    }
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        if self.panic_once.swap(false, Ordering::SeqCst) {
            panic!("injected apply panic");
        }
        self.executed
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(1)
    }
    async fn execute_query(&self, _sql: &str) -> Result<Vec<Row>, Error> {
        Ok(vec![])
    }
    async fn execute_count_query(&self, _sql: &str) -> Result<i64, Error> {
        Ok(0)
    }
    async fn get_row_count(
        &self,
        _table: &str,
        _where_clause: Option<&str>,
    ) -> Result<(i64, bool), Error> {
        Ok((0, true))
    }
    async fn wipe(&self) -> Result<(), Error> {
        Ok(())
    }
}

fn source(
    feed: &Arc<Feed>,
    target: &Arc<Target>,
    checkpoints: &Arc<MemoryCheckpointStore>,
) -> CdcSource {
    CdcSource::new(
        SourceConfig {
            source_id: "src-1".to_string(),
            database_id: "db-1".to_string(),
            table_name: Some("t".to_string()),
            position: None,
            poll_interval: Duration::from_millis(10),
            batch_size: 64,
            apply_options: ApplyOptions::default(),
            max_transient_retries: 5,
        },
        DatabaseType::Postgres,
        DatabaseType::Postgres,
        Arc::new(FeedReplication { feed: feed.clone() }),
        target.clone() as Arc<dyn DataOps>,
        vec![],
        None,
        Some(checkpoints.clone() as Arc<dyn CheckpointStore>),
    )
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 3s");
}

#[tokio::test]
async fn resume_from_checkpoint_delivers_each_event_once() {
    let feed = Arc::new(Feed::default());
    let target = Target::new();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());

    for i in 1..=6u64 {
        feed.push(i, i as i64);
    }

    let src = source(&feed, &target, &checkpoints);
    assert_eq!(src.state(), SourceState::New);
    src.start().await.unwrap();

    wait_for(|| target.applied_values().len() == 6).await;
    src.stop().await.unwrap();
    assert_eq!(src.state(), SourceState::Stopped);
    assert_eq!(src.get_position().as_deref(), Some("6"));
    assert_eq!(
        checkpoints.load("src-1").await.unwrap().as_deref(),
        Some("6")
    );

    // Produce four more events while stopped, then resume.
    for i in 7..=10u64 {
        feed.push(i, i as i64);
    }
    src.start().await.unwrap();
    wait_for(|| target.applied_values().len() == 10).await;
    src.close().await.unwrap();
    assert_eq!(src.state(), SourceState::Closed);

    // Exactly 1..=10, each once; no replay of the first six.
    assert_eq!(target.applied_values(), (1..=10).collect::<Vec<i64>>());
}

#[tokio::test]
async fn fresh_source_resumes_from_stored_checkpoint() {
    let feed = Arc::new(Feed::default());
    let target = Target::new();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    checkpoints.save("src-1", "8").await.unwrap();

    for i in 1..=10u64 {
        feed.push(i, i as i64);
    }

    let src = source(&feed, &target, &checkpoints);
    src.start().await.unwrap();
    wait_for(|| target.applied_values().len() == 2).await;
    src.close().await.unwrap();

    assert_eq!(target.applied_values(), vec![9, 10]);
}

#[tokio::test]
async fn lifecycle_calls_are_idempotent_and_closed_is_terminal() {
    let feed = Arc::new(Feed::default());
    let target = Target::new();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());

    let src = source(&feed, &target, &checkpoints);
    src.start().await.unwrap();
    src.start().await.unwrap(); // no-op while active
    assert!(src.is_active());

    src.stop().await.unwrap();
    src.stop().await.unwrap(); // no-op while stopped
    assert!(!src.is_active());

    src.close().await.unwrap();
    src.close().await.unwrap(); // no-op when closed
    assert!(matches!(src.start().await, Err(Error::InvalidData(_))));
}

#[tokio::test]
async fn position_setter_validates_tokens() {
    let feed = Arc::new(Feed::default());
    let target = Target::new();
    let checkpoints = Arc::new(MemoryCheckpointStore::new());

    let src = source(&feed, &target, &checkpoints);
    src.set_position("mysql-bin.000001:12345").unwrap();
    assert_eq!(src.get_position().as_deref(), Some("mysql-bin.000001:12345"));
    assert!(src.set_position("").is_err());
}

#[tokio::test]
async fn apply_panic_is_contained_and_the_event_retries() {
    let feed = Arc::new(Feed::default());
    let target = Target::new();
    target.panic_once.store(true, Ordering::SeqCst);
    let checkpoints = Arc::new(MemoryCheckpointStore::new());

    feed.push(1, 1);

    let src = source(&feed, &target, &checkpoints);
    src.start().await.unwrap();

    // The first apply panics; the window fails without advancing and the
    // event is applied on a later tick.
    wait_for(|| target.applied_values() == vec![1]).await;
    assert!(src.is_active());
    src.close().await.unwrap();
}
