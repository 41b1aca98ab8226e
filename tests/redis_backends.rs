//! Exercises the Redis-backed cache and email queue against a small in-process
//! RESP server that understands the commands they issue.

use bmitrack::{
    cache::{KvCache, RedisCache},
    email::{
        queue::{DEAD_KEY, JOBS_KEY, PROCESSING_KEY},
        EmailJob, EmailQueue, JobSource, RedisEmailQueue,
    },
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

#[derive(Default)]
struct Store {
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
}

impl Store {
    fn move_item(&mut self, src: &str, dst: &str, from: &str, to: &str) -> Option<String> {
        let list = self.lists.get_mut(src)?;
        let item = if from.eq_ignore_ascii_case("LEFT") {
            list.pop_front()
        } else {
            list.pop_back()
        }?;
        let dst = self.lists.entry(dst.to_string()).or_default();
        if to.eq_ignore_ascii_case("LEFT") {
            dst.push_front(item.clone());
        } else {
            dst.push_back(item.clone());
        }
        Some(item)
    }
}

enum Reply {
    Status(&'static str),
    Error(&'static str),
    Int(i64),
    Bulk(Option<String>),
    Array(Vec<Reply>),
}

impl Reply {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => out.extend_from_slice(format!("+{s}\r\n").as_bytes()),
            Reply::Error(e) => out.extend_from_slice(format!("-{e}\r\n").as_bytes()),
            Reply::Int(n) => out.extend_from_slice(format!(":{n}\r\n").as_bytes()),
            Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Reply::Bulk(Some(v)) => {
                out.extend_from_slice(format!("${}\r\n{v}\r\n", v.len()).as_bytes())
            }
            Reply::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

#[derive(Default)]
struct Shared {
    store: Mutex<Store>,
    connections: AtomicUsize,
    fail_ping: AtomicBool,
}

impl Shared {
    fn apply(&self, args: &[String]) -> Reply {
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        let mut store = self.store.lock().unwrap();
        match args[0].to_ascii_uppercase().as_str() {
            "PING" if self.fail_ping.load(Ordering::SeqCst) => Reply::Error("ERR connection wedged"),
            "PING" => Reply::Status("PONG"),
            "SET" => {
                store.strings.insert(arg(1), arg(2));
                Reply::Status("OK")
            }
            "GET" => Reply::Bulk(store.strings.get(&arg(1)).cloned()),
            "DEL" => {
                let key = arg(1);
                let hit = store.strings.remove(&key).is_some() | store.lists.remove(&key).is_some();
                Reply::Int(hit as i64)
            }
            "INCR" => {
                let entry = store.strings.entry(arg(1)).or_insert_with(|| "0".into());
                let next = entry.parse::<i64>().unwrap_or(0) + 1;
                *entry = next.to_string();
                Reply::Int(next)
            }
            "EXPIRE" => Reply::Int(1),
            "LPUSH" => {
                let list = store.lists.entry(arg(1)).or_default();
                for value in &args[2..] {
                    list.push_front(value.clone());
                }
                Reply::Int(list.len() as i64)
            }
            "LMOVE" => Reply::Bulk(store.move_item(&arg(1), &arg(2), &arg(3), &arg(4))),
            "LREM" => {
                let value = arg(3);
                let removed = store
                    .lists
                    .get_mut(&arg(1))
                    .and_then(|l| l.iter().position(|v| *v == value).and_then(|i| l.remove(i)))
                    .is_some();
                Reply::Int(removed as i64)
            }
            // connection setup chatter
            _ => Reply::Status("OK"),
        }
    }

    async fn blocking_move(&self, args: &[String]) -> Reply {
        let secs: f64 = args[5].parse().unwrap_or(0.0);
        let deadline = Instant::now() + Duration::from_secs_f64(secs);
        loop {
            let moved = self
                .store
                .lock()
                .unwrap()
                .move_item(&args[1], &args[2], &args[3], &args[4]);
            if moved.is_some() || Instant::now() >= deadline {
                return Reply::Bulk(moved);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<Vec<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let n: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(n);
    for _ in 0..n {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0u8; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8_lossy(&buf).into_owned());
    }
    (!args.is_empty()).then_some(args)
}

/// Replies strictly in order, one command at a time per connection, like Redis.
async fn serve(socket: TcpStream, shared: Arc<Shared>) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    let mut queued: Option<Vec<Vec<String>>> = None;
    while let Some(args) = read_command(&mut reader).await {
        let name = args[0].to_ascii_uppercase();
        let reply = if name == "MULTI" {
            queued = Some(Vec::new());
            Reply::Status("OK")
        } else if name == "EXEC" {
            let cmds = queued.take().unwrap_or_default();
            Reply::Array(cmds.iter().map(|c| shared.apply(c)).collect())
        } else if let Some(q) = queued.as_mut() {
            q.push(args);
            Reply::Status("QUEUED")
        } else if name == "BLMOVE" {
            shared.blocking_move(&args).await
        } else {
            shared.apply(&args)
        };
        let mut out = Vec::new();
        reply.encode(&mut out);
        if write.write_all(&out).await.is_err() {
            break;
        }
    }
}

struct FakeRedis {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl FakeRedis {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());
        let accept = shared.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, accept.clone()));
            }
        });
        Self { addr, shared }
    }

    fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    fn list(&self, key: &str) -> Vec<String> {
        let store = self.shared.store.lock().unwrap();
        store
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn push(&self, key: &str, value: &str) {
        let mut store = self.shared.store.lock().unwrap();
        store
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
    }

    fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

async fn queue(server: &FakeRedis) -> Arc<RedisEmailQueue> {
    Arc::new(
        RedisEmailQueue::connect(&server.url(), Duration::from_millis(500))
            .await
            .unwrap(),
    )
}

fn job() -> EmailJob {
    EmailJob::verification("ada@example.com", "Ada", "4821")
}

#[tokio::test]
async fn enqueue_is_not_blocked_by_a_waiting_consumer() {
    let server = FakeRedis::start().await;
    // one queue handle serves both the API and the worker, as in the app state
    let queue = queue(&server).await;

    let consumer = queue.clone();
    let waiting =
        tokio::spawn(async move { consumer.reserve(Duration::from_secs(3)).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = job();
    let started = Instant::now();
    queue.enqueue(sent.clone()).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    let reserved = waiting.await.unwrap().expect("job handed to the waiting consumer");
    assert_eq!(reserved.job, sent);
    assert_eq!(server.list(PROCESSING_KEY), vec![reserved.raw.clone()]);
}

#[tokio::test]
async fn ack_clears_the_in_flight_entry() {
    let server = FakeRedis::start().await;
    let queue = queue(&server).await;
    queue.enqueue(job()).await.unwrap();

    let reserved = queue.reserve(Duration::from_secs(1)).await.unwrap().unwrap();
    assert!(server.list(JOBS_KEY).is_empty());
    assert_eq!(server.list(PROCESSING_KEY).len(), 1);

    queue.ack(&reserved).await.unwrap();
    assert!(server.list(PROCESSING_KEY).is_empty());
}

#[tokio::test]
async fn requeue_and_bury_move_the_in_flight_job() {
    let server = FakeRedis::start().await;
    let queue = queue(&server).await;
    queue.enqueue(job()).await.unwrap();

    let reserved = queue.reserve(Duration::from_secs(1)).await.unwrap().unwrap();
    let mut next = reserved.job.clone();
    next.attempts += 1;
    queue.requeue(&reserved, &next).await.unwrap();
    assert!(server.list(PROCESSING_KEY).is_empty());
    let waiting = server.list(JOBS_KEY);
    assert_eq!(waiting.len(), 1);
    let stored: EmailJob = serde_json::from_str(&waiting[0]).unwrap();
    assert_eq!(stored.attempts, 1);

    let reserved = queue.reserve(Duration::from_secs(1)).await.unwrap().unwrap();
    assert_eq!(reserved.job.attempts, 1);
    queue.bury(&reserved).await.unwrap();
    assert!(server.list(PROCESSING_KEY).is_empty());
    assert!(server.list(JOBS_KEY).is_empty());
    assert_eq!(server.list(DEAD_KEY), vec![reserved.raw]);
}

#[tokio::test]
async fn recover_returns_stranded_jobs() {
    let server = FakeRedis::start().await;
    let queue = queue(&server).await;
    let first = serde_json::to_string(&job()).unwrap();
    let second = serde_json::to_string(&job()).unwrap();
    server.push(PROCESSING_KEY, &first);
    server.push(PROCESSING_KEY, &second);

    assert_eq!(queue.recover().await.unwrap(), 2);
    assert!(server.list(PROCESSING_KEY).is_empty());

    let a = queue.reserve(Duration::from_secs(1)).await.unwrap().unwrap();
    let b = queue.reserve(Duration::from_secs(1)).await.unwrap().unwrap();
    let mut seen = vec![a.raw, b.raw];
    seen.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(seen, expected);
    assert_eq!(queue.recover().await.unwrap(), 2);
}

#[tokio::test]
async fn undecodable_job_is_dead_lettered() {
    let server = FakeRedis::start().await;
    let queue = queue(&server).await;
    server.push(JOBS_KEY, "{not json");

    assert!(queue.reserve(Duration::from_secs(1)).await.unwrap().is_none());
    assert!(server.list(PROCESSING_KEY).is_empty());
    assert_eq!(server.list(DEAD_KEY), vec!["{not json".to_string()]);
}

#[tokio::test]
async fn reserve_on_an_empty_queue_returns_nothing() {
    let server = FakeRedis::start().await;
    let queue = queue(&server).await;
    assert!(queue.reserve(Duration::from_secs(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn cache_commands_reach_redis() {
    let server = FakeRedis::start().await;
    let cache = RedisCache::connect(&server.url(), Duration::from_millis(500))
        .await
        .unwrap();

    cache.set("reset:ada@example.com", "4821", 600).await.unwrap();
    assert_eq!(
        cache.get("reset:ada@example.com").await.unwrap().as_deref(),
        Some("4821")
    );
    cache.del("reset:ada@example.com").await.unwrap();
    assert!(cache.get("reset:ada@example.com").await.unwrap().is_none());
    cache.del("reset:ada@example.com").await.unwrap();

    assert_eq!(cache.incr("resetAttempts:ada@example.com", 600).await.unwrap(), 1);
    assert_eq!(cache.incr("resetAttempts:ada@example.com", 600).await.unwrap(), 2);
}

#[tokio::test]
async fn reconnect_rebuilds_the_connection_only_after_a_failed_ping() {
    let server = FakeRedis::start().await;
    let cache = RedisCache::connect(&server.url(), Duration::from_millis(500))
        .await
        .unwrap();
    // a served command means the accept loop has counted the connection
    cache.get("k").await.unwrap();
    let baseline = server.connections();

    cache.reconnect().await.unwrap();
    cache.get("k").await.unwrap();
    assert_eq!(server.connections(), baseline);

    server.shared.fail_ping.store(true, Ordering::SeqCst);
    cache.reconnect().await.unwrap();
    server.shared.fail_ping.store(false, Ordering::SeqCst);
    cache.set("k", "v", 60).await.unwrap();
    assert_eq!(server.connections(), baseline + 1);
    assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
}
