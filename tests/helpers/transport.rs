use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Mutex;
use tus_upload::{Error, HttpRequest, HttpResponse, HttpTransport, Method, Result};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, Vec<(String, String)>),
    Fail(&'static str),
    Hang,
}

/// A `status`-only reply.
pub fn status(code: u16) -> Reply {
    Reply::Status(code, Vec::new())
}

/// A reply with headers.
pub fn with_headers(code: u16, headers: &[(&str, &str)]) -> Reply {
    Reply::Status(
        code,
        headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect(),
    )
}

/// A transport failure.
pub fn fail(message: &'static str) -> Reply {
    Reply::Fail(message)
}

/// A request observed by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct Route {
    method: Method,
    url: String,
    replies: VecDeque<Reply>,
}

/// Scripted transport: replies come from per-`(method, url)` routes when
/// one matches, else from a global FIFO. Every request is recorded for
/// post-run assertions.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Reply>>,
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reply to the global FIFO.
    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    /// Append a reply served only to `method` requests on `url`.
    pub fn route(&self, method: Method, url: &str, reply: Reply) {
        let mut routes = self.routes.lock().unwrap();
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.url == url)
        {
            Some(route) => route.replies.push_back(reply),
            None => routes.push(Route {
                method,
                url: url.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
    }

    /// Every request observed so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Observed requests matching `method`.
    pub fn requests_with(&self, method: Method) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    fn next_reply(&self, method: Method, url: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.url == url)
        {
            if let Some(reply) = route.replies.pop_front() {
                return Some(reply);
            }
        }
        drop(routes);
        self.script.lock().unwrap().pop_front()
    }
}

impl HttpTransport for MockTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let snapshot = tus_upload::RequestSnapshot {
                method: request.method(),
                url: request.url().clone(),
            };
            if let (Some(observer), Some(body)) = (request.body_progress(), request.body()) {
                observer(body.len() as u64);
            }
            self.requests.lock().unwrap().push(RecordedRequest {
                method: request.method(),
                url: request.url().as_str().to_string(),
                headers: request.headers().to_vec(),
                body: request.body().cloned(),
            });
            match self.next_reply(request.method(), request.url().as_str()) {
                Some(Reply::Status(code, headers)) => {
                    let mut response = HttpResponse::new(code);
                    for (name, value) in headers {
                        response.set_header(name, value);
                    }
                    Ok(response)
                }
                Some(Reply::Fail(message)) => Err(Error::transport(snapshot, message)),
                Some(Reply::Hang) => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
                None => Err(Error::transport(snapshot, "request was not scripted")),
            }
        })
    }
}
