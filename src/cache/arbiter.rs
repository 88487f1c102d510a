use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::disk::{CacheReply, DiskCache};
use crate::feed::redirect::RedirectState;

/// Status and body delivered to a waiting consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    pub fn error() -> Self {
        Self {
            status: 500,
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Producer half of a cache request. Answered at most once.
#[derive(Debug)]
pub struct ResponseHandle {
    tx: oneshot::Sender<CachedResponse>,
    done: CancellationToken,
}

/// Consumer half of a cache request.
///
/// Dropping it before the answer arrives signals the arbiter that nobody is
/// waiting any more; the outstanding request is abandoned.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<CachedResponse>,
    _done: DropGuard,
}

impl ResponseHandle {
    pub fn channel() -> (ResponseHandle, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        let done = CancellationToken::new();
        let pending = PendingResponse {
            rx,
            _done: done.clone().drop_guard(),
        };
        (ResponseHandle { tx, done }, pending)
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled() || self.tx.is_closed()
    }

    fn respond(self, response: CachedResponse) {
        // the receiver may have gone away in the meantime
        let _ = self.tx.send(response);
    }
}

impl PendingResponse {
    /// Waits for the answer. `None` if the request was dropped unanswered.
    pub async fn recv(self) -> Option<CachedResponse> {
        let PendingResponse { rx, _done } = self;
        rx.await.ok()
    }
}

#[derive(Debug)]
struct QueuedRequest {
    dir: PathBuf,
    url: String,
    handle: ResponseHandle,
}

#[derive(Debug, Default)]
struct ArbiterState {
    active_dir: Option<PathBuf>,
    queue: VecDeque<QueuedRequest>,
    in_flight: HashMap<u64, ResponseHandle>,
    next_id: u64,
}

struct ArbiterInner {
    cache: Mutex<DiskCache>,
    state: Mutex<ArbiterState>,
}

/// Serializes cache-backed requests through one [`DiskCache`] whose
/// directory is reassigned per request family.
///
/// Requests for the active directory are issued at once. Requests for any
/// other directory wait in FIFO order and the directory only changes when
/// nothing is in flight, so reads for two families never interleave.
#[derive(Clone)]
pub struct CacheArbiter {
    inner: Arc<ArbiterInner>,
}

impl CacheArbiter {
    pub fn new(cache: DiskCache) -> Self {
        let active_dir = cache.directory().map(Path::to_path_buf);
        Self {
            inner: Arc::new(ArbiterInner {
                cache: Mutex::new(cache),
                state: Mutex::new(ArbiterState {
                    active_dir,
                    ..ArbiterState::default()
                }),
            }),
        }
    }

    pub fn active_directory(&self) -> Option<PathBuf> {
        self.state().active_dir.clone()
    }

    /// Requests waiting for their directory to become active.
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Loads `url` through the cache directory `dir` and answers `handle`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get_cached_resource(&self, dir: impl Into<PathBuf>, url: impl Into<String>, handle: ResponseHandle) {
        let request = QueuedRequest {
            dir: dir.into(),
            url: url.into(),
            handle,
        };
        let mut state = self.state();

        if state.in_flight.is_empty() && state.active_dir.as_ref() != Some(&request.dir) {
            tracing::debug!(dir = %request.dir.display(), "Switching cache directory");
            self.cache().set_directory(&request.dir);
            state.active_dir = Some(request.dir.clone());
        }

        if state.active_dir.as_ref() != Some(&request.dir) {
            tracing::debug!(
                dir = %request.dir.display(),
                url = %request.url,
                "Queueing request for inactive cache directory"
            );
            state.queue.push_back(request);
            return;
        }

        let QueuedRequest { url, handle, .. } = request;
        let id = state.next_id;
        state.next_id += 1;
        let done = handle.done.clone();
        state.in_flight.insert(id, handle);
        drop(state);

        let cache = self.cache().clone();
        let arbiter = self.clone();
        tokio::spawn(async move {
            let reply = tokio::select! {
                _ = done.cancelled() => None,
                reply = load_chain(&cache, &url) => Some(reply),
            };
            arbiter.reply_finished(id, reply);
        });
    }

    fn reply_finished(&self, id: u64, reply: Option<CachedResponse>) {
        let next = {
            let mut state = self.state();
            let Some(handle) = state.in_flight.remove(&id) else {
                return;
            };
            match reply {
                Some(response) if !handle.is_closed() => handle.respond(response),
                _ => tracing::debug!("Discarding reply for closed response"),
            }

            if state.in_flight.is_empty() {
                next_open(&mut state.queue)
            } else {
                None
            }
        };

        if let Some(request) = next {
            self.get_cached_resource(request.dir, request.url, request.handle);
        }
    }

    fn state(&self) -> MutexGuard<'_, ArbiterState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn cache(&self) -> MutexGuard<'_, DiskCache> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pops queued requests until one still has a consumer.
fn next_open(queue: &mut VecDeque<QueuedRequest>) -> Option<QueuedRequest> {
    while let Some(request) = queue.pop_front() {
        if !request.handle.is_closed() {
            return Some(request);
        }
        tracing::debug!(url = %request.url, "Dropping queued request for closed response");
    }
    None
}

/// Follows cached and live redirects from `url` to a body.
async fn load_chain(cache: &DiskCache, url: &str) -> CachedResponse {
    let mut redirects = RedirectState::new(url);
    let mut current = url.to_owned();

    loop {
        match cache.load_prefer_cache(&current).await {
            Ok(CacheReply::Body(body)) => return CachedResponse::ok(body),
            Ok(CacheReply::Redirect(next)) => {
                redirects = match redirects.follow() {
                    Ok(advanced) => advanced,
                    Err(e) => {
                        tracing::warn!(original = %url, location = %next, "{e}");
                        return CachedResponse::error();
                    }
                };
                current = next;
            }
            Err(e) => {
                tracing::warn!(url = %current, error = %e, "Cache-backed fetch failed");
                return CachedResponse::error();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::http::MAX_RESPONSE_SIZE;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn arbiter() -> CacheArbiter {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        CacheArbiter::new(DiskCache::new(client, MAX_RESPONSE_SIZE))
    }

    #[tokio::test]
    async fn test_success_answers_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/icon.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"icon".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let arbiter = arbiter();
        let (handle, pending) = ResponseHandle::channel();
        arbiter.get_cached_resource(dir.path(), format!("{}/icon.png", server.uri()), handle);

        let response = pending.recv().await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, b"icon");
        assert_eq!(arbiter.active_directory().as_deref(), Some(dir.path()));
    }

    #[tokio::test]
    async fn test_error_answers_500() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let arbiter = arbiter();
        let (handle, pending) = ResponseHandle::channel();
        arbiter.get_cached_resource(dir.path(), server.uri(), handle);

        assert_eq!(pending.recv().await, Some(CachedResponse::error()));
    }

    #[tokio::test]
    async fn test_redirect_chain_followed_within_limit() {
        let server = MockServer::start().await;
        for hop in 0..8 {
            Mock::given(method("GET"))
                .and(path(format!("/hop{hop}")))
                .respond_with(
                    ResponseTemplate::new(302).insert_header("Location", format!("/hop{}", hop + 1)),
                )
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/hop8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("done"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let arbiter = arbiter();
        let (handle, pending) = ResponseHandle::channel();
        arbiter.get_cached_resource(dir.path(), format!("{}/hop0", server.uri()), handle);

        let response = pending.recv().await.unwrap();
        assert_eq!(response, CachedResponse::ok(b"done".to_vec()));
    }

    #[tokio::test]
    async fn test_redirect_exhaustion_answers_500() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let arbiter = arbiter();
        let (handle, pending) = ResponseHandle::channel();
        arbiter.get_cached_resource(dir.path(), format!("{}/loop", server.uri()), handle);

        assert_eq!(pending.recv().await, Some(CachedResponse::error()));
        assert_eq!(arbiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_other_directory_waits_for_in_flight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("slow")
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fast"))
            .mount(&server)
            .await;

        let first_dir = tempfile::tempdir().unwrap();
        let second_dir = tempfile::tempdir().unwrap();
        let arbiter = arbiter();

        let (first, first_pending) = ResponseHandle::channel();
        let (second, second_pending) = ResponseHandle::channel();
        arbiter.get_cached_resource(first_dir.path(), format!("{}/slow", server.uri()), first);
        arbiter.get_cached_resource(second_dir.path(), format!("{}/fast", server.uri()), second);

        assert_eq!(arbiter.in_flight(), 1);
        assert_eq!(arbiter.queued(), 1);
        assert_eq!(arbiter.active_directory().as_deref(), Some(first_dir.path()));

        assert_eq!(first_pending.recv().await.unwrap().body, b"slow");
        assert_eq!(second_pending.recv().await.unwrap().body, b"fast");
        assert_eq!(arbiter.active_directory().as_deref(), Some(second_dir.path()));
        assert_eq!(arbiter.queued(), 0);
    }

    #[tokio::test]
    async fn test_dropped_consumer_is_deregistered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let arbiter = arbiter();
        let (handle, pending) = ResponseHandle::channel();
        arbiter.get_cached_resource(dir.path(), server.uri(), handle);
        assert_eq!(arbiter.in_flight(), 1);

        drop(pending);
        tokio::time::timeout(Duration::from_secs(2), async {
            while arbiter.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
