//! In-memory stand-ins for the catalog, the image host, the browser session
//! and the clock.

use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use crate::catalog::{CatalogError, CatalogGateway};
use crate::driver::{DriverError, SessionDriver, SessionHandle};
use crate::fetch::{AssetFetcher, FetchError, write_atomic};
use crate::models::CatalogRecord;
use crate::poll::Clock;
use crate::remote::{script_tag, tag};

/// A minimal binary glTF payload of `len` bytes.
pub fn glb_bytes(len: usize) -> Vec<u8> {
    let mut bytes = b"glTF\x02\x00\x00\x00".to_vec();
    bytes.resize(len.max(bytes.len()), 0);
    bytes
}

pub struct ManualClock {
    base: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().expect("clock")
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("clock").clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().expect("clock") += duration;
        self.sleeps.lock().expect("clock").push(duration);
    }
}

#[derive(Clone)]
enum Reply {
    Text(String),
    Fail(String),
    Panic,
}

#[derive(Default)]
struct DriverState {
    queues: HashMap<String, VecDeque<Reply>>,
    calls: Vec<String>,
    opens: u32,
    closes: Vec<String>,
    uploads: Vec<PathBuf>,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Answers each tagged script from a per-tag queue. The last reply in a queue
/// repeats forever.
pub struct ScriptedDriver {
    state: Mutex<DriverState>,
    hooks: HashMap<String, Hook>,
    open_error: Option<String>,
    upload_error: Option<String>,
}

impl ScriptedDriver {
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(DriverState::default()),
            hooks: HashMap::new(),
            open_error: None,
            upload_error: None,
        }
    }

    /// Every step of a successful run, with the generate button showing 25.
    pub fn happy_path() -> Self {
        Self::empty()
            .respond(tag::DOCUMENT_READY, ["complete"])
            .respond(tag::UPLOAD_RECEIVED, ["waiting", "received"])
            .respond(tag::SELECT_QUALITY, ["selected"])
            .respond(tag::TOGGLE_OFF, ["clicked"])
            .respond(tag::FEATURE_STATE, ["off"])
            .respond(tag::READ_COST, ["25"])
            .respond(tag::CLICK_GENERATE, ["clicked"])
            .respond(tag::GENERATION_STATUS, ["pending", "pending", "done"])
            .respond(tag::OPEN_EXPORT, ["opened"])
            .respond(tag::SET_EXPORT_FILENAME, ["set"])
            .respond(tag::CONFIRM_EXPORT, ["clicked"])
            .respond(tag::NAVIGATE, ["navigating"])
            .respond(tag::OPEN_LATEST_MENU, ["opened"])
            .respond(tag::CLICK_MENU_ITEM, ["clicked"])
            .respond(tag::CONFIRM_DIALOG, ["clicked"])
    }

    fn queue(&mut self, tag: &str) -> &mut VecDeque<Reply> {
        self.state
            .get_mut()
            .expect("driver state")
            .queues
            .entry(tag.to_string())
            .or_default()
    }

    pub fn respond<I, S>(mut self, tag: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = self.queue(tag);
        queue.clear();
        queue.extend(replies.into_iter().map(|r| Reply::Text(r.into())));
        self
    }

    pub fn then_respond<I, S>(mut self, tag: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queue(tag)
            .extend(replies.into_iter().map(|r| Reply::Text(r.into())));
        self
    }

    pub fn fail(mut self, tag: &str, message: &str) -> Self {
        let queue = self.queue(tag);
        queue.clear();
        queue.push_back(Reply::Fail(message.to_string()));
        self
    }

    pub fn panic_on(mut self, tag: &str) -> Self {
        let queue = self.queue(tag);
        queue.clear();
        queue.push_back(Reply::Panic);
        self
    }

    pub fn on_evaluate(mut self, tag: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.insert(tag.to_string(), Box::new(hook));
        self
    }

    pub fn fail_open(mut self, message: &str) -> Self {
        self.open_error = Some(message.to_string());
        self
    }

    pub fn fail_upload(mut self, message: &str) -> Self {
        self.upload_error = Some(message.to_string());
        self
    }

    pub fn count(&self, tag: &str) -> usize {
        self.state
            .lock()
            .expect("driver state")
            .calls
            .iter()
            .filter(|t| t.as_str() == tag)
            .count()
    }

    pub fn tags(&self) -> Vec<String> {
        self.state.lock().expect("driver state").calls.clone()
    }

    pub fn opens(&self) -> u32 {
        self.state.lock().expect("driver state").opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().expect("driver state").closes.len()
    }

    pub fn uploads(&self) -> Vec<PathBuf> {
        self.state.lock().expect("driver state").uploads.clone()
    }
}

#[async_trait]
impl SessionDriver for ScriptedDriver {
    async fn open(&self, _target_url: &str) -> Result<SessionHandle, DriverError> {
        if let Some(message) = &self.open_error {
            return Err(DriverError::Open(message.clone()));
        }
        let mut state = self.state.lock().expect("driver state");
        state.opens += 1;
        Ok(SessionHandle::new(state.opens.to_string()))
    }

    async fn evaluate(&self, _handle: &SessionHandle, script: &str) -> Result<String, DriverError> {
        let tag = script_tag(script).unwrap_or("untagged").to_string();
        let reply = {
            let mut state = self.state.lock().expect("driver state");
            state.calls.push(tag.clone());
            match state.queues.get_mut(&tag) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        if let Some(hook) = self.hooks.get(&tag) {
            hook();
        }
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(DriverError::Script(message)),
            Some(Reply::Panic) => panic!("scripted panic on `{tag}`"),
            None => Err(DriverError::Script(format!("no scripted reply for `{tag}`"))),
        }
    }

    async fn upload_file(&self, _handle: &SessionHandle, path: &Path) -> Result<(), DriverError> {
        self.state
            .lock()
            .expect("driver state")
            .uploads
            .push(path.to_path_buf());
        match &self.upload_error {
            Some(message) => Err(DriverError::NativeInput(message.clone())),
            None => Ok(()),
        }
    }

    async fn close(&self, handle: &SessionHandle) {
        self.state
            .lock()
            .expect("driver state")
            .closes
            .push(handle.id().to_string());
    }
}

pub struct MemoryCatalog {
    rows: Mutex<Vec<CatalogRecord>>,
    fail_updates: bool,
    lookups: AtomicU32,
}

impl MemoryCatalog {
    pub fn new(rows: Vec<CatalogRecord>) -> Self {
        Self {
            rows: Mutex::new(rows),
            fail_updates: false,
            lookups: AtomicU32::new(0),
        }
    }

    pub fn with_item(name: &str, resized: Option<&str>, image: Option<&str>) -> Self {
        Self::new(vec![CatalogRecord {
            name: name.to_string(),
            image: image.map(Into::into),
            resized_image: resized.map(Into::into),
            model_3d: None,
        }])
    }

    pub fn failing_updates(mut self) -> Self {
        self.fail_updates = true;
        self
    }

    pub fn record(&self, name: &str) -> Option<CatalogRecord> {
        self.rows
            .lock()
            .expect("catalog")
            .iter()
            .find(|r| r.name == name)
            .cloned()
    }

    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogGateway for MemoryCatalog {
    async fn lookup(&self, item: &str) -> Result<Option<CatalogRecord>, CatalogError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.record(item))
    }

    async fn set_asset_reference(
        &self,
        item: &str,
        reference: &str,
    ) -> Result<usize, CatalogError> {
        if self.fail_updates {
            return Err(CatalogError::Request("HTTP 503 Service Unavailable".into()));
        }
        let mut rows = self.rows.lock().expect("catalog");
        let mut updated = 0;
        for row in rows.iter_mut().filter(|r| r.name == item) {
            row.model_3d = Some(reference.to_string());
            updated += 1;
        }
        Ok(updated)
    }
}

pub struct StaticFetcher {
    bytes: Vec<u8>,
    error: Option<String>,
    calls: AtomicU32,
}

impl StaticFetcher {
    pub fn jpeg() -> Self {
        Self {
            bytes: b"\xff\xd8\xff\xe0 chair".to_vec(),
            error: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            bytes: Vec::new(),
            error: Some(message.to_string()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<u64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.error {
            return Err(FetchError::Network(message.clone()));
        }
        if self.bytes.is_empty() {
            return Err(FetchError::Empty);
        }
        write_atomic(dest, &self.bytes).await?;
        Ok(self.bytes.len() as u64)
    }
}
