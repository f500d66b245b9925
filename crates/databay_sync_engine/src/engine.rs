//! The transfer engine.
//!
//! A sync brings the remote contents of one draft in line with a local
//! [`Catalog`]:
//!
//! 1. Take the draft lock (`ConcurrentSync` if another sync holds it)
//! 2. Re-read the draft and its branch head (`StaleDraft` if the head moved)
//! 3. List the remote draft and diff the catalog against it
//! 4. Create new segments, register sensors, transfer frames, unregister
//!    sensors, then delete segments, each phase fanned out over a bounded
//!    pool of scoped threads
//! 5. Record failed and cancelled items in the draft's ledger
//!
//! Item failures never abort their siblings. They end up in the
//! [`SyncReport`] and block a commit until a later sync succeeds for them or
//! they are explicitly skipped.

use crate::cancel::CancellationToken;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::lock::{KeyGuard, KeyedLocks};
use crate::pool;
use crate::remote::RemoteClient;
use crate::transport::Transport;
use databay_core::{
    lineage, Catalog, CatalogMode, Checksum, CommitId, CoreError, CoreResult, DataItem, Draft,
    DraftNumber, Frame, ItemKey, Lineage, OpKind, PlanOp,
};
use databay_protocol::{
    item_infos, BeginUpload, ContentRevision, FinalizeUpload, FrameInfo, SegmentInfo, UpdateLabel,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Identifies one frame upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameKey {
    /// Draft the frame is uploaded to.
    pub draft: DraftNumber,
    /// Segment name.
    pub segment: String,
    /// Frame index.
    pub index: u64,
}

/// Final state of one planned item.
#[derive(Debug)]
pub enum ItemOutcome {
    /// The item reached the server.
    Succeeded(PlanOp),
    /// The item failed for good. The error is a [`SyncError::TerminalItem`].
    Failed {
        /// The planned operation.
        op: PlanOp,
        /// Why it failed.
        error: SyncError,
    },
    /// The item was not attempted, or stopped early, because the sync was
    /// cancelled.
    Cancelled(PlanOp),
}

impl ItemOutcome {
    /// Returns the planned operation.
    pub fn op(&self) -> &PlanOp {
        match self {
            ItemOutcome::Succeeded(op) | ItemOutcome::Cancelled(op) => op,
            ItemOutcome::Failed { op, .. } => op,
        }
    }

    /// Returns the item key.
    pub fn key(&self) -> &ItemKey {
        &self.op().key
    }

    /// Returns true for succeeded items.
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded(_))
    }

    fn from_result(op: PlanOp, result: SyncResult<()>) -> Self {
        match result {
            Ok(()) => ItemOutcome::Succeeded(op),
            Err(SyncError::Cancelled) => ItemOutcome::Cancelled(op),
            Err(error) => {
                warn!(item = %op, error = %error, "item failed");
                ItemOutcome::Failed {
                    error: SyncError::TerminalItem {
                        key: op.key.clone(),
                        source: Box::new(error),
                    },
                    op,
                }
            }
        }
    }
}

/// Per-segment tally of a sync, the segment operation included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSummary {
    /// Segment name.
    pub segment: String,
    /// Items that succeeded.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Items that were cancelled.
    pub cancelled: usize,
}

impl SegmentSummary {
    /// Returns true if every item of the segment succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

/// Result of one sync.
#[derive(Debug)]
pub struct SyncReport {
    /// The synced draft.
    pub draft: DraftNumber,
    /// One outcome per planned item, in plan order.
    pub outcomes: Vec<ItemOutcome>,
    /// One summary per touched segment, in name order.
    pub segments: Vec<SegmentSummary>,
    /// Wall time of the sync.
    pub duration: Duration,
}

impl SyncReport {
    /// Returns the number of succeeded items.
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Succeeded(_)))
    }

    /// Returns the number of failed items.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    /// Returns the number of cancelled items.
    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Cancelled(_)))
    }

    /// Returns true if every item succeeded.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(ItemOutcome::is_success)
    }

    /// Returns the outcomes that did not succeed.
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    fn count(&self, f: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(o)).count()
    }
}

/// Failed, cancelled and skipped items of one draft.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    failed: BTreeSet<ItemKey>,
    skipped: BTreeSet<ItemKey>,
}

impl Ledger {
    /// Items whose last sync failed or was cancelled.
    pub fn failed(&self) -> impl Iterator<Item = &ItemKey> {
        self.failed.iter()
    }

    /// Items explicitly excluded from the commit check.
    pub fn skipped(&self) -> impl Iterator<Item = &ItemKey> {
        self.skipped.iter()
    }

    /// Returns true if `key` is skipped.
    pub fn is_skipped(&self, key: &ItemKey) -> bool {
        self.skipped.contains(key)
    }

    /// Returns true if nothing failed.
    pub fn is_clear(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Syncs that ran their plan to the end.
    pub syncs_completed: u64,
    /// Items that succeeded.
    pub items_succeeded: u64,
    /// Items that failed.
    pub items_failed: u64,
    /// Items that were cancelled.
    pub items_cancelled: u64,
    /// Parts uploaded.
    pub parts_uploaded: u64,
    /// Payload bytes uploaded.
    pub bytes_uploaded: u64,
    /// Frames downloaded.
    pub frames_downloaded: u64,
    /// Payload bytes downloaded.
    pub bytes_downloaded: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Transfers catalogs to and from the server.
pub struct SyncEngine<T: Transport> {
    remote: RemoteClient<T>,
    drafts: KeyedLocks<DraftNumber>,
    frames: KeyedLocks<FrameKey>,
    ledgers: Mutex<HashMap<DraftNumber, Ledger>>,
    stats: RwLock<SyncStats>,
}

impl<T: Transport> SyncEngine<T> {
    /// Creates an engine for the dataset `remote` points at.
    pub fn new(remote: RemoteClient<T>) -> Self {
        Self {
            remote,
            drafts: KeyedLocks::new(),
            frames: KeyedLocks::new(),
            ledgers: Mutex::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the remote client.
    pub fn remote(&self) -> &RemoteClient<T> {
        &self.remote
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        self.remote.config()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the ledger of a draft.
    pub fn ledger(&self, draft: DraftNumber) -> Ledger {
        self.ledgers.lock().get(&draft).cloned().unwrap_or_default()
    }

    /// Excludes an item from the commit readiness check of a draft.
    pub fn skip_item(&self, draft: DraftNumber, key: ItemKey) {
        info!(%draft, item = %key, "skipping item");
        self.ledgers
            .lock()
            .entry(draft)
            .or_default()
            .skipped
            .insert(key);
    }

    /// Forgets everything recorded about a draft.
    pub fn discard_ledger(&self, draft: DraftNumber) {
        self.ledgers.lock().remove(&draft);
    }

    /// Takes the per-draft lock.
    pub fn lock_draft(&self, draft: DraftNumber) -> SyncResult<KeyGuard<'_, DraftNumber>> {
        self.drafts
            .try_lock(draft)
            .ok_or_else(|| SyncError::ConcurrentSync {
                target: format!("draft #{draft}"),
            })
    }

    /// Loads a revision into a catalog.
    pub fn checkout(&self, mode: &CatalogMode) -> SyncResult<Catalog> {
        let (mut catalog, revision) = match mode {
            CatalogMode::Draft(number) => (
                Catalog::for_draft(*number),
                Some(ContentRevision::Draft(*number)),
            ),
            CatalogMode::Snapshot(Some(id)) => (
                Catalog::for_commit(Some(id.clone())),
                Some(ContentRevision::Commit(id.clone())),
            ),
            // The empty root has no contents.
            CatalogMode::Snapshot(None) => (Catalog::for_commit(None), None),
        };

        if let Some(revision) = revision {
            for segment in self.remote.segments(&revision)? {
                catalog.load_segment(
                    segment.name.clone(),
                    segment.description.clone(),
                    segment.fusion,
                )?;
                for sensor in self.remote.sensors(&revision, &segment.name)? {
                    catalog.load_sensor(&segment.name, sensor)?;
                }
                for frame in self.remote.frames(&revision, &segment.name)? {
                    catalog.load_frame(&segment.name, frame.index, frame.to_frame()?)?;
                }
            }
            debug!(
                %revision,
                segments = catalog.segments().count(),
                frames = catalog.frame_count(),
                "checked out revision"
            );
        }
        Ok(catalog)
    }

    /// Downloads a frame's payload and returns the frame with its item bytes.
    pub fn download(&self, frame: &Frame, cancel: &CancellationToken) -> SyncResult<Frame> {
        let key = frame
            .object_key()
            .ok_or_else(|| SyncError::InvalidState("frame has not been uploaded".into()))?;
        let payload = self.remote.object(key, cancel)?;

        let mut items = Vec::with_capacity(frame.items().len());
        for span in frame.layout() {
            let range = item_range(span.offset, span.item.size(), payload.len()).map_err(|e| {
                CoreError::invalid_frame(format!("object {key} does not fit its frame layout: {e}"))
            })?;
            let mut item = DataItem::new(
                span.item.sensor(),
                span.item.remote_path(),
                payload.slice(range),
            );
            if let Some(timestamp) = span.item.timestamp() {
                item = item.with_timestamp(timestamp);
            }
            items.push(item);
        }

        let content = Checksum::of_items(items.iter().map(|i| {
            (
                i.sensor(),
                i.remote_path(),
                i.data().map_or(&[][..], |d| &d[..]),
            )
        }));
        if content.with_label(frame.label()) != frame.checksum() {
            return Err(CoreError::invalid_frame(format!(
                "object {key} does not match the frame checksum"
            ))
            .into());
        }

        {
            let mut stats = self.stats.write();
            stats.frames_downloaded += 1;
            stats.bytes_downloaded += payload.len() as u64;
        }
        Ok(Frame::from_remote(
            frame.frame_id(),
            items,
            frame.label().clone(),
            content,
            Some(key.to_string()),
        )?)
    }

    /// Re-reads a draft and fails with `StaleDraft` unless its branch head
    /// is still the draft's parent.
    pub fn check_fresh(&self, draft: DraftNumber) -> SyncResult<Draft> {
        let remote_draft = self.remote.draft(draft)?;
        if !remote_draft.is_open() {
            return Err(SyncError::InvalidState(format!(
                "draft #{draft} is {}",
                remote_draft.status
            )));
        }
        let head = self.remote.branch(&remote_draft.branch)?.head;
        let relation = lineage(&self.remote, remote_draft.parent.as_ref(), head.as_ref())?;
        if relation.is_up_to_date() {
            return Ok(remote_draft);
        }
        Err(SyncError::StaleDraft {
            draft,
            detail: format!(
                "based on {}, branch {} has {} to {}",
                show(remote_draft.parent.as_ref()),
                remote_draft.branch,
                match relation {
                    Lineage::Diverged => "diverged",
                    _ => "advanced",
                },
                show(head.as_ref())
            ),
        })
    }

    /// Returns the items that keep a draft from being committed: failed
    /// ledger entries plus everything the catalog still differs in, minus
    /// skipped items.
    pub fn pending_items(&self, catalog: &Catalog) -> SyncResult<Vec<ItemKey>> {
        let draft = writable_draft(catalog)?;
        let remote = self.remote.snapshot(&ContentRevision::Draft(draft))?;
        let ledger = self.ledger(draft);

        let pending: BTreeSet<ItemKey> = catalog
            .diff_against(&remote)
            .into_iter()
            .map(|op| op.key)
            .chain(ledger.failed.iter().cloned())
            .filter(|key| !ledger.is_skipped(key))
            .collect();
        Ok(pending.into_iter().collect())
    }

    /// Pushes a draft catalog to the server.
    pub fn sync(&self, catalog: &mut Catalog, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        let draft = writable_draft(catalog)?;
        let _guard = self.lock_draft(draft)?;
        let result = self.sync_locked(draft, catalog, cancel);
        if let Err(e) = &result {
            self.handle_error(e);
        }
        result
    }

    /// Runs a sync while the caller holds the draft lock.
    pub(crate) fn sync_locked(
        &self,
        draft: DraftNumber,
        catalog: &mut Catalog,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let start = Instant::now();

        self.check_fresh(draft)?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let remote = self.remote.snapshot(&ContentRevision::Draft(draft))?;
        let plan = catalog.diff_against(&remote);
        info!(%draft, items = plan.len(), "executing plan");

        let (outcomes, uploaded) = self.execute(draft, catalog, plan, cancel);
        for (segment, index, object_key) in uploaded {
            catalog.mark_uploaded(&segment, index, object_key)?;
        }

        let segments = summarize(&outcomes);
        for summary in &segments {
            debug!(
                %draft,
                segment = %summary.segment,
                succeeded = summary.succeeded,
                failed = summary.failed,
                cancelled = summary.cancelled,
                "segment done"
            );
        }

        let report = SyncReport {
            draft,
            outcomes,
            segments,
            duration: start.elapsed(),
        };
        self.record(&report);
        info!(
            %draft,
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "sync finished"
        );
        Ok(report)
    }

    fn execute(
        &self,
        draft: DraftNumber,
        catalog: &Catalog,
        plan: Vec<PlanOp>,
        cancel: &CancellationToken,
    ) -> (Vec<ItemOutcome>, Vec<(String, u64, String)>) {
        let parallelism = self.config().parallelism;
        let mut creates = Vec::new();
        let mut sensor_puts = Vec::new();
        let mut frames = Vec::new();
        let mut sensor_deletes = Vec::new();
        let mut deletes = Vec::new();
        for op in plan {
            match (&op.key, op.kind) {
                (ItemKey::Frame { .. }, _) => frames.push(op),
                (ItemKey::Sensor { .. }, OpKind::Delete) => sensor_deletes.push(op),
                (ItemKey::Sensor { .. }, _) => sensor_puts.push(op),
                (ItemKey::Segment { .. }, OpKind::Delete) => deletes.push(op),
                (ItemKey::Segment { .. }, _) => creates.push(op),
            }
        }

        let mut outcomes = pool::run(parallelism, creates, |op| {
            let result = self.create_segment(draft, catalog, op.key.segment_name(), cancel);
            ItemOutcome::from_result(op, result)
        });

        // Sensors and frames of a segment that could not be created have
        // nowhere to go.
        let mut blocked: HashMap<String, bool> = HashMap::new();
        for outcome in &outcomes {
            if !outcome.is_success() {
                let cancelled = matches!(outcome, ItemOutcome::Cancelled(_));
                blocked.insert(outcome.key().segment_name().to_string(), cancelled);
            }
        }
        let sensor_puts = release(&blocked, sensor_puts, &mut outcomes);
        let frames = release(&blocked, frames, &mut outcomes);

        outcomes.extend(pool::run(parallelism, sensor_puts, |op| {
            let result = self.put_sensor(draft, catalog, &op.key, cancel);
            ItemOutcome::from_result(op, result)
        }));

        let transferred = pool::run(parallelism, frames, |op| {
            let result = self.transfer_frame(draft, catalog, &op, cancel);
            match result {
                Ok(Some(info)) => {
                    let uploaded = (op.key.segment_name().to_string(), info.index, info.object_key);
                    (ItemOutcome::Succeeded(op), Some(uploaded))
                }
                Ok(None) => (ItemOutcome::Succeeded(op), None),
                Err(err) => (ItemOutcome::from_result(op, Err(err)), None),
            }
        });
        let mut uploaded = Vec::new();
        for (outcome, upload) in transferred {
            outcomes.push(outcome);
            uploaded.extend(upload);
        }

        outcomes.extend(pool::run(parallelism, sensor_deletes, |op| {
            let result = match &op.key {
                _ if cancel.is_cancelled() => Err(SyncError::Cancelled),
                ItemKey::Sensor { segment, sensor } => {
                    self.remote.delete_sensor(draft, segment, sensor, cancel)
                }
                key => Err(SyncError::InvalidState(format!("{key} is not a sensor"))),
            };
            ItemOutcome::from_result(op, result)
        }));

        outcomes.extend(pool::run(parallelism, deletes, |op| {
            let result = if cancel.is_cancelled() {
                Err(SyncError::Cancelled)
            } else {
                self.remote.delete_segment(draft, op.key.segment_name(), cancel)
            };
            ItemOutcome::from_result(op, result)
        }));

        (outcomes, uploaded)
    }

    fn create_segment(
        &self,
        draft: DraftNumber,
        catalog: &Catalog,
        name: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let segment = catalog.segment(name).ok_or_else(|| CoreError::SegmentNotFound {
            name: name.to_string(),
        })?;
        self.remote.create_segment(
            draft,
            &SegmentInfo {
                name: name.to_string(),
                description: segment.description().map(str::to_string),
                fusion: segment.is_fusion(),
            },
        )?;
        debug!(%draft, segment = name, "created segment");
        Ok(())
    }

    fn put_sensor(
        &self,
        draft: DraftNumber,
        catalog: &Catalog,
        key: &ItemKey,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let ItemKey::Sensor { segment, sensor } = key else {
            return Err(SyncError::InvalidState(format!("{key} is not a sensor")));
        };
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let registered = catalog
            .segment(segment)
            .and_then(|s| s.sensor(sensor))
            .ok_or_else(|| CoreError::UnknownSensor {
                segment: segment.clone(),
                sensor: sensor.clone(),
            })?;
        self.remote.put_sensor(draft, segment, registered, cancel)?;
        debug!(%draft, item = %key, "registered sensor");
        Ok(())
    }

    fn transfer_frame(
        &self,
        draft: DraftNumber,
        catalog: &Catalog,
        op: &PlanOp,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<FrameInfo>> {
        let ItemKey::Frame { segment, index } = &op.key else {
            return Err(SyncError::InvalidState(format!("{op} is not a frame operation")));
        };
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        match op.kind {
            OpKind::Delete => {
                self.remote.delete_frame(draft, segment, *index, cancel)?;
                debug!(%draft, item = %op.key, "deleted frame");
                Ok(None)
            }
            OpKind::Update => {
                let frame = catalog.frame(segment, *index)?;
                match (frame.payload(), frame.object_key()) {
                    (None, Some(_)) => self
                        .update_label(draft, segment, *index, frame, cancel)
                        .map(Some),
                    _ => self
                        .upload_frame(draft, segment, *index, frame, cancel)
                        .map(Some),
                }
            }
            OpKind::Create => {
                let frame = catalog.frame(segment, *index)?;
                self.upload_frame(draft, segment, *index, frame, cancel)
                    .map(Some)
            }
        }
    }

    /// Sends the label of a frame whose items are already stored.
    ///
    /// The server refuses if the stored items differ from the frame's.
    pub fn update_label(
        &self,
        draft: DraftNumber,
        segment: &str,
        index: u64,
        frame: &Frame,
        cancel: &CancellationToken,
    ) -> SyncResult<FrameInfo> {
        let _guard = self.lock_frame(draft, segment, index)?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let info = self.remote.update_label(
            draft,
            segment,
            index,
            &UpdateLabel::of(frame),
            cancel,
        )?;
        debug!(%draft, segment, index, "relabeled frame");
        Ok(info)
    }

    fn lock_frame(
        &self,
        draft: DraftNumber,
        segment: &str,
        index: u64,
    ) -> SyncResult<KeyGuard<'_, FrameKey>> {
        let key = FrameKey {
            draft,
            segment: segment.to_string(),
            index,
        };
        self.frames
            .try_lock(key)
            .ok_or_else(|| SyncError::ConcurrentSync {
                target: format!("{segment}[{index}] of draft #{draft}"),
            })
    }

    /// Uploads one frame in parts and finalizes it.
    ///
    /// At most one upload per frame runs at a time; a second concurrent
    /// attempt fails with `ConcurrentSync`.
    pub fn upload_frame(
        &self,
        draft: DraftNumber,
        segment: &str,
        index: u64,
        frame: &Frame,
        cancel: &CancellationToken,
    ) -> SyncResult<FrameInfo> {
        let _guard = self.lock_frame(draft, segment, index)?;

        let payload = frame.payload().ok_or_else(|| {
            CoreError::invalid_frame(format!("{segment}[{index}] has no local payload"))
        })?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let session = self.remote.begin_upload(
            draft,
            &BeginUpload {
                segment: segment.to_string(),
                index,
                size: payload.len() as u64,
                checksum: frame.checksum(),
            },
            cancel,
        )?;

        let part_size = self.config().part_size as usize;
        let mut receipts = Vec::with_capacity(payload.len().div_ceil(part_size));
        for (number, start) in (1u32..).zip((0..payload.len()).step_by(part_size)) {
            let part = payload.slice(start..(start + part_size).min(payload.len()));
            let sent = part.len() as u64;
            let receipt = self
                .remote
                .put_part(&session.upload_id, number, part, cancel)?;
            if receipt.part_number != number || receipt.size != sent {
                return Err(SyncError::InvalidState(format!(
                    "part {number} of {segment}[{index}] acknowledged as part {} with {} byte(s)",
                    receipt.part_number, receipt.size
                )));
            }
            receipts.push(receipt);
            let mut stats = self.stats.write();
            stats.parts_uploaded += 1;
            stats.bytes_uploaded += sent;
        }

        let info = self.remote.finalize_upload(
            &session.upload_id,
            &FinalizeUpload {
                frame_id: frame.frame_id(),
                items: item_infos(frame),
                label: frame.label().clone(),
                parts: receipts,
            },
            cancel,
        )?;
        debug!(%draft, segment, index, object = %info.object_key, "uploaded frame");
        Ok(info)
    }

    fn record(&self, report: &SyncReport) {
        {
            let mut ledgers = self.ledgers.lock();
            let ledger = ledgers.entry(report.draft).or_default();
            // Items outside the plan already match the server.
            ledger.failed = report.failures().map(|o| o.key().clone()).collect();
            for outcome in report.outcomes.iter().filter(|o| o.is_success()) {
                ledger.skipped.remove(outcome.key());
            }
        }

        let mut stats = self.stats.write();
        stats.syncs_completed += 1;
        stats.items_succeeded += report.succeeded() as u64;
        stats.items_failed += report.failed() as u64;
        stats.items_cancelled += report.cancelled() as u64;
        stats.last_sync_time = Some(Instant::now());
        stats.last_error = report
            .failures()
            .find_map(|o| match o {
                ItemOutcome::Failed { error, .. } => Some(error.to_string()),
                _ => None,
            });
    }

    fn handle_error(&self, error: &SyncError) {
        warn!(error = %error, "sync failed");
        self.stats.write().last_error = Some(error.to_string());
    }
}

fn writable_draft(catalog: &Catalog) -> SyncResult<DraftNumber> {
    catalog.draft().ok_or_else(|| {
        CoreError::ImmutableSnapshot {
            revision: catalog
                .revision()
                .map_or_else(|| "root".to_string(), |r| r.to_string()),
        }
        .into()
    })
}

/// Moves operations on blocked segments into `outcomes` and returns the
/// rest.
fn release(
    blocked: &HashMap<String, bool>,
    ops: Vec<PlanOp>,
    outcomes: &mut Vec<ItemOutcome>,
) -> Vec<PlanOp> {
    let (runnable, orphans): (Vec<_>, Vec<_>) = ops
        .into_iter()
        .partition(|op| !blocked.contains_key(op.key.segment_name()));
    for op in orphans {
        let segment = op.key.segment_name().to_string();
        let result = if blocked.get(&segment).copied().unwrap_or(false) {
            Err(SyncError::Cancelled)
        } else {
            Err(SyncError::InvalidState(format!("segment {segment} was not created")))
        };
        outcomes.push(ItemOutcome::from_result(op, result));
    }
    runnable
}

/// Returns where an item lies in a payload of `len` bytes.
fn item_range(offset: u64, size: u64, len: usize) -> CoreResult<Range<usize>> {
    let start = usize::try_from(offset)
        .map_err(|_| CoreError::invalid_frame(format!("offset {offset} is out of range")))?;
    let end = usize::try_from(size)
        .ok()
        .and_then(|size| start.checked_add(size))
        .ok_or_else(|| {
            CoreError::invalid_frame(format!("item of {size} byte(s) at {offset} overflows"))
        })?;
    if end > len {
        return Err(CoreError::invalid_frame(format!(
            "item ends at {end}, the object has {len} byte(s)"
        )));
    }
    Ok(start..end)
}

fn show(commit: Option<&CommitId>) -> String {
    commit.map_or_else(|| "root".to_string(), |c| c.short().to_string())
}

fn summarize(outcomes: &[ItemOutcome]) -> Vec<SegmentSummary> {
    let mut by_segment: BTreeMap<&str, SegmentSummary> = BTreeMap::new();
    for outcome in outcomes {
        let name = outcome.key().segment_name();
        let summary = by_segment.entry(name).or_insert_with(|| SegmentSummary {
            segment: name.to_string(),
            ..SegmentSummary::default()
        });
        match outcome {
            ItemOutcome::Succeeded(_) => summary.succeeded += 1,
            ItemOutcome::Failed { .. } => summary.failed += 1,
            ItemOutcome::Cancelled(_) => summary.cancelled += 1,
        }
    }
    by_segment.into_values().collect()
}
