//! URL layout of the API.
//!
//! Every route lives under `/v1/datasets`. Dynamic path segments are
//! percent-encoded, so branch names containing `/` stay a single segment.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::DEFAULT_PAGE_LIMIT;
use databay_core::{BranchName, CommitId, DraftNumber};
use std::fmt;

/// Prefix of every route.
pub const API_PREFIX: &str = "/v1/datasets";

/// A revision whose content can be listed: a draft or a commit.
///
/// Branches are resolved to their head commit by the client before content
/// is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentRevision {
    /// A draft.
    Draft(DraftNumber),
    /// A commit.
    Commit(CommitId),
}

impl ContentRevision {
    /// Parses the `draft:<n>` / `commit:<id>` path form.
    pub fn parse(s: &str) -> ProtocolResult<Self> {
        let invalid = |reason: String| ProtocolError::invalid_parameter("revision", reason);
        if let Some(number) = s.strip_prefix("draft:") {
            let number: u64 = number
                .parse()
                .map_err(|_| invalid(format!("bad draft number {number:?}")))?;
            DraftNumber::new(number)
                .map(ContentRevision::Draft)
                .map_err(|e| invalid(e.to_string()))
        } else if let Some(id) = s.strip_prefix("commit:") {
            CommitId::parse(id)
                .map(ContentRevision::Commit)
                .map_err(|e| invalid(e.to_string()))
        } else {
            Err(invalid(format!("expected draft:<n> or commit:<id>, got {s:?}")))
        }
    }

    /// Returns the draft number for drafts.
    pub fn draft(&self) -> Option<DraftNumber> {
        match self {
            ContentRevision::Draft(number) => Some(*number),
            ContentRevision::Commit(_) => None,
        }
    }
}

impl fmt::Display for ContentRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRevision::Draft(number) => write!(f, "draft:{number}"),
            ContentRevision::Commit(id) => write!(f, "commit:{id}"),
        }
    }
}

/// A resource addressed by a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/v1/datasets`
    Datasets,
    /// `/v1/datasets/{dataset}`
    Dataset {
        /// Dataset name.
        dataset: String,
    },
    /// `/v1/datasets/{dataset}/commits`
    Commits {
        /// Dataset name.
        dataset: String,
    },
    /// `/v1/datasets/{dataset}/commits/{id}`
    Commit {
        /// Dataset name.
        dataset: String,
        /// Commit ID.
        id: CommitId,
    },
    /// `/v1/datasets/{dataset}/branches`
    Branches {
        /// Dataset name.
        dataset: String,
    },
    /// `/v1/datasets/{dataset}/branches/{name}`
    Branch {
        /// Dataset name.
        dataset: String,
        /// Branch name.
        name: BranchName,
    },
    /// `/v1/datasets/{dataset}/drafts`
    Drafts {
        /// Dataset name.
        dataset: String,
    },
    /// `/v1/datasets/{dataset}/drafts/{number}`
    Draft {
        /// Dataset name.
        dataset: String,
        /// Draft number.
        number: DraftNumber,
    },
    /// `/v1/datasets/{dataset}/drafts/{number}/close`
    CloseDraft {
        /// Dataset name.
        dataset: String,
        /// Draft number.
        number: DraftNumber,
    },
    /// `/v1/datasets/{dataset}/drafts/{number}/commit`
    CommitDraft {
        /// Dataset name.
        dataset: String,
        /// Draft number.
        number: DraftNumber,
    },
    /// `/v1/datasets/{dataset}/revisions/{revision}/segments`
    Segments {
        /// Dataset name.
        dataset: String,
        /// Revision.
        revision: ContentRevision,
    },
    /// `/v1/datasets/{dataset}/revisions/{revision}/segments/{segment}`
    Segment {
        /// Dataset name.
        dataset: String,
        /// Revision.
        revision: ContentRevision,
        /// Segment name.
        segment: String,
    },
    /// `/v1/datasets/{dataset}/revisions/{revision}/segments/{segment}/frames`
    Frames {
        /// Dataset name.
        dataset: String,
        /// Revision.
        revision: ContentRevision,
        /// Segment name.
        segment: String,
    },
    /// `/v1/datasets/{dataset}/revisions/{revision}/segments/{segment}/frames/{index}`
    Frame {
        /// Dataset name.
        dataset: String,
        /// Revision.
        revision: ContentRevision,
        /// Segment name.
        segment: String,
        /// Frame index.
        index: u64,
    },
    /// `/v1/datasets/{dataset}/revisions/{revision}/segments/{segment}/frames/{index}/label`
    FrameLabel {
        /// Dataset name.
        dataset: String,
        /// Revision.
        revision: ContentRevision,
        /// Segment name.
        segment: String,
        /// Frame index.
        index: u64,
    },
    /// `/v1/datasets/{dataset}/revisions/{revision}/segments/{segment}/sensors`
    Sensors {
        /// Dataset name.
        dataset: String,
        /// Revision.
        revision: ContentRevision,
        /// Segment name.
        segment: String,
    },
    /// `/v1/datasets/{dataset}/revisions/{revision}/segments/{segment}/sensors/{name}`
    Sensor {
        /// Dataset name.
        dataset: String,
        /// Revision.
        revision: ContentRevision,
        /// Segment name.
        segment: String,
        /// Sensor name.
        name: String,
    },
    /// `/v1/datasets/{dataset}/revisions/draft:{number}/uploads`
    Uploads {
        /// Dataset name.
        dataset: String,
        /// Draft receiving the upload.
        draft: DraftNumber,
    },
    /// `/v1/datasets/{dataset}/uploads/{upload_id}/parts/{part}`
    UploadPart {
        /// Dataset name.
        dataset: String,
        /// Upload ID.
        upload_id: String,
        /// Part number, starting at 1.
        part: u32,
    },
    /// `/v1/datasets/{dataset}/uploads/{upload_id}/finalize`
    FinalizeUpload {
        /// Dataset name.
        dataset: String,
        /// Upload ID.
        upload_id: String,
    },
    /// `/v1/datasets/{dataset}/objects/{key}`
    Object {
        /// Dataset name.
        dataset: String,
        /// Object key.
        key: String,
    },
}

impl Route {
    /// Renders the path, without query.
    pub fn path(&self) -> String {
        let e = |s: &str| urlencoding::encode(s).into_owned();
        match self {
            Route::Datasets => API_PREFIX.to_string(),
            Route::Dataset { dataset } => format!("{API_PREFIX}/{}", e(dataset)),
            Route::Commits { dataset } => format!("{API_PREFIX}/{}/commits", e(dataset)),
            Route::Commit { dataset, id } => format!("{API_PREFIX}/{}/commits/{id}", e(dataset)),
            Route::Branches { dataset } => format!("{API_PREFIX}/{}/branches", e(dataset)),
            Route::Branch { dataset, name } => {
                format!("{API_PREFIX}/{}/branches/{}", e(dataset), e(name.as_str()))
            }
            Route::Drafts { dataset } => format!("{API_PREFIX}/{}/drafts", e(dataset)),
            Route::Draft { dataset, number } => {
                format!("{API_PREFIX}/{}/drafts/{number}", e(dataset))
            }
            Route::CloseDraft { dataset, number } => {
                format!("{API_PREFIX}/{}/drafts/{number}/close", e(dataset))
            }
            Route::CommitDraft { dataset, number } => {
                format!("{API_PREFIX}/{}/drafts/{number}/commit", e(dataset))
            }
            Route::Segments { dataset, revision } => format!(
                "{API_PREFIX}/{}/revisions/{}/segments",
                e(dataset),
                e(&revision.to_string())
            ),
            Route::Segment {
                dataset,
                revision,
                segment,
            } => format!(
                "{API_PREFIX}/{}/revisions/{}/segments/{}",
                e(dataset),
                e(&revision.to_string()),
                e(segment)
            ),
            Route::Frames {
                dataset,
                revision,
                segment,
            } => format!(
                "{API_PREFIX}/{}/revisions/{}/segments/{}/frames",
                e(dataset),
                e(&revision.to_string()),
                e(segment)
            ),
            Route::Frame {
                dataset,
                revision,
                segment,
                index,
            } => format!(
                "{API_PREFIX}/{}/revisions/{}/segments/{}/frames/{index}",
                e(dataset),
                e(&revision.to_string()),
                e(segment)
            ),
            Route::FrameLabel {
                dataset,
                revision,
                segment,
                index,
            } => format!(
                "{API_PREFIX}/{}/revisions/{}/segments/{}/frames/{index}/label",
                e(dataset),
                e(&revision.to_string()),
                e(segment)
            ),
            Route::Sensors {
                dataset,
                revision,
                segment,
            } => format!(
                "{API_PREFIX}/{}/revisions/{}/segments/{}/sensors",
                e(dataset),
                e(&revision.to_string()),
                e(segment)
            ),
            Route::Sensor {
                dataset,
                revision,
                segment,
                name,
            } => format!(
                "{API_PREFIX}/{}/revisions/{}/segments/{}/sensors/{}",
                e(dataset),
                e(&revision.to_string()),
                e(segment),
                e(name)
            ),
            Route::Uploads { dataset, draft } => format!(
                "{API_PREFIX}/{}/revisions/{}/uploads",
                e(dataset),
                e(&ContentRevision::Draft(*draft).to_string())
            ),
            Route::UploadPart {
                dataset,
                upload_id,
                part,
            } => format!(
                "{API_PREFIX}/{}/uploads/{}/parts/{part}",
                e(dataset),
                e(upload_id)
            ),
            Route::FinalizeUpload { dataset, upload_id } => format!(
                "{API_PREFIX}/{}/uploads/{}/finalize",
                e(dataset),
                e(upload_id)
            ),
            Route::Object { dataset, key } => {
                format!("{API_PREFIX}/{}/objects/{}", e(dataset), e(key))
            }
        }
    }

    /// Renders the path followed by the encoded query.
    pub fn with_query(&self, query: &Query) -> String {
        format!("{}{}", self.path(), query.encode())
    }

    /// Parses a request target into its route and query.
    pub fn parse(target: &str) -> ProtocolResult<(Route, Query)> {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Query::parse(query)?),
            None => (target, Query::new()),
        };
        let unknown = || ProtocolError::UnknownRoute {
            path: path.to_string(),
        };

        let rest = path.strip_prefix(API_PREFIX).ok_or_else(unknown)?;
        let rest = rest.trim_end_matches('/');
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(unknown());
        }

        let segments = rest
            .split('/')
            .skip(1)
            .map(decode)
            .collect::<ProtocolResult<Vec<String>>>()?;
        let parts: Vec<&str> = segments.iter().map(String::as_str).collect();

        let route = match parts.as_slice() {
            [] => Route::Datasets,
            [dataset] => Route::Dataset {
                dataset: dataset.to_string(),
            },
            [dataset, "commits"] => Route::Commits {
                dataset: dataset.to_string(),
            },
            [dataset, "commits", id] => Route::Commit {
                dataset: dataset.to_string(),
                id: CommitId::parse(id)
                    .map_err(|e| ProtocolError::invalid_parameter("commit", e.to_string()))?,
            },
            [dataset, "branches"] => Route::Branches {
                dataset: dataset.to_string(),
            },
            [dataset, "branches", name] => Route::Branch {
                dataset: dataset.to_string(),
                name: BranchName::new(*name)
                    .map_err(|e| ProtocolError::invalid_parameter("branch", e.to_string()))?,
            },
            [dataset, "drafts"] => Route::Drafts {
                dataset: dataset.to_string(),
            },
            [dataset, "drafts", number] => Route::Draft {
                dataset: dataset.to_string(),
                number: parse_draft(number)?,
            },
            [dataset, "drafts", number, "close"] => Route::CloseDraft {
                dataset: dataset.to_string(),
                number: parse_draft(number)?,
            },
            [dataset, "drafts", number, "commit"] => Route::CommitDraft {
                dataset: dataset.to_string(),
                number: parse_draft(number)?,
            },
            [dataset, "revisions", revision, "segments"] => Route::Segments {
                dataset: dataset.to_string(),
                revision: ContentRevision::parse(revision)?,
            },
            [dataset, "revisions", revision, "segments", segment] => Route::Segment {
                dataset: dataset.to_string(),
                revision: ContentRevision::parse(revision)?,
                segment: segment.to_string(),
            },
            [dataset, "revisions", revision, "segments", segment, "frames"] => Route::Frames {
                dataset: dataset.to_string(),
                revision: ContentRevision::parse(revision)?,
                segment: segment.to_string(),
            },
            [dataset, "revisions", revision, "segments", segment, "frames", index] => {
                Route::Frame {
                    dataset: dataset.to_string(),
                    revision: ContentRevision::parse(revision)?,
                    segment: segment.to_string(),
                    index: parse_number("index", index)?,
                }
            }
            [dataset, "revisions", revision, "segments", segment, "frames", index, "label"] => {
                Route::FrameLabel {
                    dataset: dataset.to_string(),
                    revision: ContentRevision::parse(revision)?,
                    segment: segment.to_string(),
                    index: parse_number("index", index)?,
                }
            }
            [dataset, "revisions", revision, "segments", segment, "sensors"] => Route::Sensors {
                dataset: dataset.to_string(),
                revision: ContentRevision::parse(revision)?,
                segment: segment.to_string(),
            },
            [dataset, "revisions", revision, "segments", segment, "sensors", name] => {
                Route::Sensor {
                    dataset: dataset.to_string(),
                    revision: ContentRevision::parse(revision)?,
                    segment: segment.to_string(),
                    name: name.to_string(),
                }
            }
            [dataset, "revisions", revision, "uploads"] => Route::Uploads {
                dataset: dataset.to_string(),
                draft: ContentRevision::parse(revision)?.draft().ok_or_else(|| {
                    ProtocolError::invalid_parameter("revision", "uploads target a draft")
                })?,
            },
            [dataset, "uploads", upload_id, "parts", part] => Route::UploadPart {
                dataset: dataset.to_string(),
                upload_id: upload_id.to_string(),
                part: parse_number("part", part)?,
            },
            [dataset, "uploads", upload_id, "finalize"] => Route::FinalizeUpload {
                dataset: dataset.to_string(),
                upload_id: upload_id.to_string(),
            },
            [dataset, "objects", key] => Route::Object {
                dataset: dataset.to_string(),
                key: key.to_string(),
            },
            _ => return Err(unknown()),
        };

        Ok((route, query))
    }
}

/// Query string parameters, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query with `offset` and `limit`.
    pub fn page(offset: u64, limit: u64) -> Self {
        Self::new().with("offset", offset).with("limit", limit)
    }

    /// Appends a parameter.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl ToString) -> Self {
        self.pairs.push((name.to_string(), value.to_string()));
        self
    }

    /// Appends a parameter if a value is present.
    #[must_use]
    pub fn with_opt(self, name: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    /// Returns the first value of a parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns a numeric parameter.
    pub fn get_u64(&self, name: &str) -> ProtocolResult<Option<u64>> {
        self.get(name).map(|v| parse_number(name, v)).transpose()
    }

    /// Returns `(offset, limit)`, defaulting to the first page.
    pub fn paging(&self) -> ProtocolResult<(u64, u64)> {
        let offset = self.get_u64("offset")?.unwrap_or(0);
        let limit = self.get_u64("limit")?.unwrap_or(DEFAULT_PAGE_LIMIT);
        Ok((offset, limit))
    }

    /// Encodes as `?a=b&c=d`, or an empty string.
    pub fn encode(&self) -> String {
        if self.pairs.is_empty() {
            return String::new();
        }
        let joined = self
            .pairs
            .iter()
            .map(|(n, v)| format!("{}={}", urlencoding::encode(n), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("?{joined}")
    }

    /// Parses the part after `?`.
    pub fn parse(query: &str) -> ProtocolResult<Self> {
        let mut pairs = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            pairs.push((decode(name)?, decode(value)?));
        }
        Ok(Self { pairs })
    }
}

fn decode(s: &str) -> ProtocolResult<String> {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .map_err(|e| ProtocolError::invalid_parameter(s, e.to_string()))
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> ProtocolResult<T> {
    value
        .parse()
        .map_err(|_| ProtocolError::invalid_parameter(name, format!("not a number: {value:?}")))
}

fn parse_draft(value: &str) -> ProtocolResult<DraftNumber> {
    DraftNumber::new(parse_number("draft", value)?)
        .map_err(|e| ProtocolError::invalid_parameter("draft", e.to_string()))
}
