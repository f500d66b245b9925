//! The reference server and its request dispatch.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::DatasetStore;
use databay_core::{BranchName, CommitId, DraftStatus};
use databay_protocol::{
    HttpRequest, HttpResponse, LoopbackServer, Method, Route, ACCESS_KEY_HEADER,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Request counters.
#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    failed: AtomicU64,
    parts: AtomicU64,
    frames: AtomicU64,
    commits: AtomicU64,
}

/// A snapshot of the server's request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Requests handled.
    pub requests: u64,
    /// Requests answered with an error.
    pub failed: u64,
    /// Parts stored.
    pub parts: u64,
    /// Frames stored by a finalized upload.
    pub frames: u64,
    /// Drafts committed.
    pub commits: u64,
}

/// The in-memory reference server.
///
/// Requests come in as [`HttpRequest`] values, either from an HTTP front end
/// or in-process through [`LoopbackServer`].
///
/// # Example
///
/// ```
/// use databay_protocol::{HttpRequest, LoopbackServer};
/// use databay_server::{DataServer, ServerConfig};
///
/// let server = DataServer::new(ServerConfig::default());
/// let response = server.handle(&HttpRequest::get("/v1/datasets"));
/// assert_eq!(response.status, 200);
/// ```
pub struct DataServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    counters: Counters,
}

impl DataServer {
    /// Creates a new server with an empty store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(DatasetStore::new()))
    }

    /// Creates a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<DatasetStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self {
            handler,
            context,
            counters: Counters::default(),
        }
    }

    /// Returns the typed handler.
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<DatasetStore> {
        &self.context.store
    }

    /// Returns the request counters.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            parts: self.counters.parts.load(Ordering::Relaxed),
            frames: self.counters.frames.load(Ordering::Relaxed),
            commits: self.counters.commits.load(Ordering::Relaxed),
        }
    }

    /// Handles one request, turning errors into error responses.
    pub fn handle_request(&self, request: &HttpRequest) -> HttpResponse {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        match self.dispatch(request) {
            Ok(response) => response,
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if err.is_server_error() {
                    warn!(method = %request.method, path = %request.path, error = %err, "request failed");
                } else {
                    debug!(method = %request.method, path = %request.path, error = %err, "request rejected");
                }
                err.to_response()
            }
        }
    }

    fn authorize(&self, request: &HttpRequest) -> ServerResult<()> {
        match &self.context.config.access_key {
            Some(key) if request.header(ACCESS_KEY_HEADER) != Some(key.as_str()) => {
                Err(ServerError::Unauthorized)
            }
            _ => Ok(()),
        }
    }

    fn dispatch(&self, request: &HttpRequest) -> ServerResult<HttpResponse> {
        self.authorize(request)?;
        let (route, query) = Route::parse(&request.path)?;
        let h = &self.handler;

        match (request.method, route) {
            (Method::Get, Route::Datasets) => {
                let (offset, limit) = query.paging()?;
                json(&h.list_datasets(offset, limit)?)
            }
            (Method::Post, Route::Datasets) => json(&h.create_dataset(request.json_body()?)?),
            (Method::Get, Route::Dataset { dataset }) => json(&h.get_dataset(&dataset)?),
            (Method::Delete, Route::Dataset { dataset }) => {
                h.delete_dataset(&dataset)?;
                Ok(HttpResponse::no_content())
            }

            (Method::Get, Route::Commits { dataset }) => {
                let head = query
                    .get("head")
                    .ok_or_else(|| ServerError::InvalidRequest("missing head".into()))
                    .and_then(|id| Ok(CommitId::parse(id)?))?;
                let (offset, limit) = query.paging()?;
                json(&h.list_commits(&dataset, &head, offset, limit)?)
            }
            (Method::Get, Route::Commit { dataset, id }) => json(&h.get_commit(&dataset, &id)?),

            (Method::Get, Route::Branches { dataset }) => {
                let (offset, limit) = query.paging()?;
                json(&h.list_branches(&dataset, offset, limit)?)
            }
            (Method::Post, Route::Branches { dataset }) => {
                json(&h.create_branch(&dataset, request.json_body()?)?)
            }
            (Method::Get, Route::Branch { dataset, name }) => json(&h.get_branch(&dataset, &name)?),
            (Method::Delete, Route::Branch { dataset, name }) => {
                h.delete_branch(&dataset, &name)?;
                Ok(HttpResponse::no_content())
            }

            (Method::Get, Route::Drafts { dataset }) => {
                let branch = query.get("branch").map(BranchName::new).transpose()?;
                let status = query.get("status").map(parse_status).transpose()?;
                let (offset, limit) = query.paging()?;
                json(&h.list_drafts(&dataset, branch.as_ref(), status, offset, limit)?)
            }
            (Method::Post, Route::Drafts { dataset }) => {
                json(&h.create_draft(&dataset, request.json_body()?)?)
            }
            (Method::Get, Route::Draft { dataset, number }) => json(&h.get_draft(&dataset, number)?),
            (Method::Post, Route::CloseDraft { dataset, number }) => {
                json(&h.close_draft(&dataset, number)?)
            }
            (Method::Post, Route::CommitDraft { dataset, number }) => {
                let commit = h.commit_draft(&dataset, number, request.json_body()?)?;
                self.counters.commits.fetch_add(1, Ordering::Relaxed);
                json(&commit)
            }

            (Method::Get, Route::Segments { dataset, revision }) => {
                let (offset, limit) = query.paging()?;
                json(&h.list_segments(&dataset, &revision, offset, limit)?)
            }
            (Method::Post, Route::Segments { dataset, revision }) => {
                json(&h.create_segment(&dataset, &revision, request.json_body()?)?)
            }
            (
                Method::Delete,
                Route::Segment {
                    dataset,
                    revision,
                    segment,
                },
            ) => {
                h.delete_segment(&dataset, &revision, &segment)?;
                Ok(HttpResponse::no_content())
            }
            (
                Method::Get,
                Route::Frames {
                    dataset,
                    revision,
                    segment,
                },
            ) => {
                let (offset, limit) = query.paging()?;
                json(&h.list_frames(&dataset, &revision, &segment, offset, limit)?)
            }
            (
                Method::Get,
                Route::Frame {
                    dataset,
                    revision,
                    segment,
                    index,
                },
            ) => json(&h.get_frame(&dataset, &revision, &segment, index)?),
            (
                Method::Delete,
                Route::Frame {
                    dataset,
                    revision,
                    segment,
                    index,
                },
            ) => {
                h.delete_frame(&dataset, &revision, &segment, index)?;
                Ok(HttpResponse::no_content())
            }

            (
                Method::Put,
                Route::FrameLabel {
                    dataset,
                    revision,
                    segment,
                    index,
                },
            ) => json(&h.update_label(&dataset, &revision, &segment, index, request.json_body()?)?),
            (
                Method::Get,
                Route::Sensors {
                    dataset,
                    revision,
                    segment,
                },
            ) => {
                let (offset, limit) = query.paging()?;
                json(&h.list_sensors(&dataset, &revision, &segment, offset, limit)?)
            }
            (
                Method::Put,
                Route::Sensor {
                    dataset,
                    revision,
                    segment,
                    name,
                },
            ) => json(&h.put_sensor(&dataset, &revision, &segment, &name, request.json_body()?)?),
            (
                Method::Delete,
                Route::Sensor {
                    dataset,
                    revision,
                    segment,
                    name,
                },
            ) => {
                h.delete_sensor(&dataset, &revision, &segment, &name)?;
                Ok(HttpResponse::no_content())
            }

            (Method::Post, Route::Uploads { dataset, draft }) => {
                json(&h.begin_upload(&dataset, draft, request.json_body()?)?)
            }
            (
                Method::Put,
                Route::UploadPart {
                    dataset,
                    upload_id,
                    part,
                },
            ) => {
                let receipt = h.put_part(&dataset, &upload_id, part, request.body.clone())?;
                self.counters.parts.fetch_add(1, Ordering::Relaxed);
                json(&receipt)
            }
            (Method::Post, Route::FinalizeUpload { dataset, upload_id }) => {
                let frame = h.finalize_upload(&dataset, &upload_id, request.json_body()?)?;
                self.counters.frames.fetch_add(1, Ordering::Relaxed);
                json(&frame)
            }
            (Method::Get, Route::Object { dataset, key }) => {
                Ok(HttpResponse::new(200, h.get_object(&dataset, &key)?))
            }

            (method, route) => Err(ServerError::InvalidRequest(format!(
                "{method} is not supported on {}",
                route.path()
            ))),
        }
    }
}

impl LoopbackServer for DataServer {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        self.handle_request(request)
    }
}

fn json<T: Serialize>(body: &T) -> ServerResult<HttpResponse> {
    Ok(HttpResponse::ok_json(body)?)
}

fn parse_status(s: &str) -> ServerResult<DraftStatus> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| ServerError::InvalidRequest(format!("unknown draft status {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use databay_core::{Branch, Commit, DataItem, Draft, Frame, Sensor};
    use databay_protocol::{
        item_infos, BeginUpload, ContentRevision, ErrorCode, FinalizeUpload, FrameInfo, Page,
        PartReceipt, Query, SegmentInfo, UploadSession,
    };
    use serde_json::json;

    fn post<T: Serialize>(server: &DataServer, route: Route, body: &T) -> HttpResponse {
        server.handle(&HttpRequest::json(Method::Post, route.path(), body).unwrap())
    }

    fn setup() -> (DataServer, Draft) {
        let server = DataServer::new(ServerConfig::default());
        let response = post(&server, Route::Datasets, &json!({"name": "cars"}));
        assert_eq!(response.status, 200);
        let draft: Draft = post(
            &server,
            Route::Drafts {
                dataset: "cars".into(),
            },
            &json!({"branch": "main", "title": "init"}),
        )
        .json()
        .unwrap();
        (server, draft)
    }

    #[test]
    fn server_lifecycle() {
        let server = DataServer::new(ServerConfig::default());
        assert_eq!(server.stats(), ServerStats::default());
        let response = server.handle(&HttpRequest::get("/v1/datasets"));
        assert_eq!(response.status, 200);
        assert_eq!(server.stats().requests, 1);
        assert!(server.store().is_empty());
    }

    #[test]
    fn full_upload_and_commit_flow() {
        let (server, draft) = setup();
        let revision = ContentRevision::Draft(draft.number);
        let dataset = "cars".to_string();

        let response = post(
            &server,
            Route::Segments {
                dataset: dataset.clone(),
                revision: revision.clone(),
            },
            &SegmentInfo {
                name: "s1".into(),
                description: Some("day".into()),
                fusion: false,
            },
        );
        assert_eq!(response.status, 200);

        let frame = Frame::single(DataItem::new("cam", "0001.jpg", &b"pixels"[..])).unwrap();
        let payload = frame.payload().unwrap();
        let session: UploadSession = post(
            &server,
            Route::Uploads {
                dataset: dataset.clone(),
                draft: draft.number,
            },
            &BeginUpload {
                segment: "s1".into(),
                index: 0,
                size: payload.len() as u64,
                checksum: frame.checksum(),
            },
        )
        .json()
        .unwrap();

        let part_path = Route::UploadPart {
            dataset: dataset.clone(),
            upload_id: session.upload_id.clone(),
            part: 1,
        }
        .path();
        let receipt: PartReceipt = server
            .handle(&HttpRequest::new(Method::Put, part_path).with_body(payload.clone()))
            .json()
            .unwrap();

        let stored: FrameInfo = post(
            &server,
            Route::FinalizeUpload {
                dataset: dataset.clone(),
                upload_id: session.upload_id,
            },
            &FinalizeUpload {
                frame_id: frame.frame_id(),
                items: item_infos(&frame),
                label: json!(null),
                parts: vec![receipt],
            },
        )
        .json()
        .unwrap();
        assert_eq!(stored.object_key, session.object_key);

        let commit: Commit = post(
            &server,
            Route::CommitDraft {
                dataset: dataset.clone(),
                number: draft.number,
            },
            &json!({"message": "first", "committer": "tester"}),
        )
        .json()
        .unwrap();
        assert_eq!(commit.parent, None);

        let branch: Branch = server
            .handle(&HttpRequest::get(
                Route::Branch {
                    dataset: dataset.clone(),
                    name: BranchName::default_branch(),
                }
                .path(),
            ))
            .json()
            .unwrap();
        assert_eq!(branch.head, Some(commit.id.clone()));

        let frames: Page<FrameInfo> = server
            .handle(&HttpRequest::get(
                Route::Frames {
                    dataset: dataset.clone(),
                    revision: ContentRevision::Commit(commit.id),
                    segment: "s1".into(),
                }
                .with_query(&Query::page(0, 10)),
            ))
            .json()
            .unwrap();
        assert_eq!(frames.items.len(), 1);

        let object = server.handle(&HttpRequest::get(
            Route::Object {
                dataset,
                key: stored.object_key,
            }
            .path(),
        ));
        assert_eq!(object.body, payload);

        let stats = server.stats();
        assert_eq!(stats.parts, 1);
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.commits, 1);
    }

    #[test]
    fn errors_carry_codes() {
        let (server, _) = setup();
        let response = server.handle(&HttpRequest::delete(
            Route::Branch {
                dataset: "cars".into(),
                name: BranchName::default_branch(),
            }
            .path(),
        ));
        assert_eq!(response.status, 409);
        assert_eq!(
            response.error_body().unwrap().code,
            ErrorCode::ProtectedBranch
        );

        let response = server.handle(&HttpRequest::get("/v1/datasets/nope"));
        assert_eq!(response.status, 404);
        assert_eq!(server.stats().failed, 2);
    }

    #[test]
    fn access_key_enforced() {
        let server = DataServer::new(ServerConfig::default().with_access_key("secret"));
        let response = server.handle(&HttpRequest::get("/v1/datasets"));
        assert_eq!(response.status, 401);

        let response = server
            .handle(&HttpRequest::get("/v1/datasets").with_header(ACCESS_KEY_HEADER, "secret"));
        assert_eq!(response.status, 200);
    }

    #[test]
    fn unsupported_method() {
        let server = DataServer::new(ServerConfig::default());
        let response = server.handle(&HttpRequest::delete("/v1/datasets"));
        assert_eq!(response.status, 400);
    }

    #[test]
    fn draft_listing_by_status() {
        let (server, draft) = setup();
        let target = Route::Drafts {
            dataset: "cars".into(),
        }
        .with_query(&Query::new().with("status", "OPEN"));
        let page: Page<Draft> = server.handle(&HttpRequest::get(target)).json().unwrap();
        assert_eq!(page.items, vec![draft]);

        let bad = Route::Drafts {
            dataset: "cars".into(),
        }
        .with_query(&Query::new().with("status", "MAYBE"));
        assert_eq!(server.handle(&HttpRequest::get(bad)).status, 400);
    }

    #[test]
    fn sensor_registry_endpoints() {
        let (server, draft) = setup();
        let revision = ContentRevision::Draft(draft.number);
        let created = post(
            &server,
            Route::Segments {
                dataset: "cars".into(),
                revision: revision.clone(),
            },
            &json!({"name": "drive", "fusion": true}),
        );
        assert_eq!(created.status, 200);

        let sensor = Route::Sensor {
            dataset: "cars".into(),
            revision: revision.clone(),
            segment: "drive".into(),
            name: "lidar".into(),
        };
        let body = Sensor::new("lidar").with_description("roof");
        let response = server.handle(
            &HttpRequest::json(Method::Put, sensor.path(), &body).unwrap(),
        );
        assert_eq!(response.status, 200);

        let listing = Route::Sensors {
            dataset: "cars".into(),
            revision,
            segment: "drive".into(),
        };
        let page: Page<Sensor> = server
            .handle(&HttpRequest::get(listing.path()))
            .json()
            .unwrap();
        assert_eq!(page.items, vec![body]);

        assert_eq!(server.handle(&HttpRequest::delete(sensor.path())).status, 204);
        assert_eq!(server.handle(&HttpRequest::delete(sensor.path())).status, 404);
    }
}
