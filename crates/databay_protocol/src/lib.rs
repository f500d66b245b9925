//! # DataBay Protocol
//!
//! Wire protocol types for DataBay.
//!
//! This crate provides:
//! - `HttpRequest` / `HttpResponse`, a transport-neutral HTTP envelope
//! - `Route`, the URL layout of the API, with percent-encoded parameters
//! - JSON request and response bodies, including paged listings
//! - `ErrorBody` and `ErrorCode` carried by every failed response
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod http;
mod messages;
mod routes;

pub use error::{ErrorBody, ErrorCode, ProtocolError, ProtocolResult};
pub use http::{
    HttpRequest, HttpResponse, LoopbackServer, Method, ACCESS_KEY_HEADER, JSON_CONTENT_TYPE,
    OCTET_STREAM,
};
pub use messages::{
    item_infos, BeginUpload, CommitDraft, CreateBranch, CreateDataset, CreateDraft, DatasetInfo,
    FinalizeUpload, FrameInfo, ItemInfo, Page, PartReceipt, SegmentInfo, UpdateLabel,
    UploadSession, DEFAULT_PAGE_LIMIT,
};
pub use routes::{ContentRevision, Query, Route, API_PREFIX};
