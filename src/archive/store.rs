//! Archive write path, listing maintenance and the read-side enumerator.

use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Category, parse_time_key, time_key};
use crate::codec::{GroupingFlag, TelemetryTransferFrame};
use crate::error::{ArchiveError, ChannelError};
use crate::fabric::{ReadySignal, Receiver, Wait};

type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Image container receiving segments.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenContainer {
    key: String,
    next_segment: u32,
}

/// Writes transfer frames into the archive tree.
///
/// Owned by the archive writer task, which makes it the only holder of the
/// current image container.
#[derive(Debug)]
pub struct ArchiveStore {
    root: PathBuf,
    container: Option<OpenContainer>,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), container: None }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist one frame and refresh the affected listings.
    pub async fn write(&mut self, frame: &TelemetryTransferFrame) -> ArchiveResult<PathBuf> {
        let category =
            Category::from_apid(frame.apid()).ok_or(ArchiveError::UncategorizedApid { apid: frame.apid() })?;
        match category {
            Category::Image => self.write_segment(frame).await,
            _ => self.write_entry(category, frame).await,
        }
    }

    async fn write_entry(&self, category: Category, frame: &TelemetryTransferFrame) -> ArchiveResult<PathBuf> {
        let dir = self.root.join(category.dir_name());
        create_dir(&dir).await?;

        let path = dir.join(format!("{}.bin", time_key(frame.created())));
        write_file(&path, &frame.to_bytes()).await?;

        let names = sorted_entries(&dir, EntryKind::TimeFile).await?;
        write_listing(&dir.join(category.listing_name()), &names).await?;
        Ok(path)
    }

    async fn write_segment(&mut self, frame: &TelemetryTransferFrame) -> ArchiveResult<PathBuf> {
        let img = self.root.join(Category::Image.dir_name());
        let grouping = frame.grouping();

        let opens = matches!(grouping, GroupingFlag::First | GroupingFlag::Unsegmented);
        if opens {
            if let Some(stale) = &self.container {
                warn!("Image container {} closed without a last segment", stale.key);
            }
            let key = time_key(frame.created());
            create_dir(&img.join(&key)).await?;
            self.container = Some(OpenContainer { key, next_segment: 1 });
        }

        let Some(container) = self.container.as_mut() else {
            return Err(ArchiveError::SegmentWithoutContainer { grouping: grouping_name(grouping) });
        };

        let dir = img.join(&container.key);
        let path = dir.join(format!("{}.bin", container.next_segment));
        container.next_segment += 1;
        let key = container.key.clone();

        write_file(&path, &frame.to_bytes()).await?;

        let segments = sorted_entries(&dir, EntryKind::Segment).await?;
        write_listing(&img.join(format!("{key}_dir.ls")), &segments).await?;

        if opens {
            let containers = sorted_entries(&img, EntryKind::Container).await?;
            write_listing(&img.join(Category::Image.listing_name()), &containers).await?;
        }

        if matches!(grouping, GroupingFlag::Last | GroupingFlag::Unsegmented) {
            debug!("Image container {} complete with {} segments", key, segments.len());
            self.container = None;
        }
        Ok(path)
    }
}

fn grouping_name(grouping: GroupingFlag) -> &'static str {
    match grouping {
        GroupingFlag::Continuation => "continuation",
        GroupingFlag::First => "first",
        GroupingFlag::Last => "last",
        GroupingFlag::Unsegmented => "unsegmented",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    /// `<sec>_<ms>.bin`
    TimeFile,
    /// `<n>.bin`
    Segment,
    /// `<sec>_<ms>` directory
    Container,
}

/// Enumerate `dir` and return matching names in time (or segment) order.
async fn sorted_entries(dir: &Path, kind: EntryKind) -> ArchiveResult<Vec<String>> {
    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(|e| ArchiveError::io(dir, e))?;
    let mut keyed: Vec<((u32, u16), String)> = Vec::new();

    while let Some(entry) = read_dir.next_entry().await.map_err(|e| ArchiveError::io(dir, e))? {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);

        let key = match kind {
            EntryKind::TimeFile if !is_dir => name.strip_suffix(".bin").and_then(parse_time_key),
            EntryKind::Segment if !is_dir => {
                name.strip_suffix(".bin").and_then(|n| n.parse::<u32>().ok()).map(|n| (n, 0))
            }
            EntryKind::Container if is_dir => parse_time_key(&name),
            _ => None,
        };
        if let Some(key) = key {
            keyed.push((key, name));
        }
    }

    keyed.sort();
    Ok(keyed.into_iter().map(|(_, name)| name).collect())
}

/// Replace a listing file in one step.
async fn write_listing(path: &Path, names: &[String]) -> ArchiveResult<()> {
    let mut body = names.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    let tmp = path.with_extension("ls.tmp");
    write_file(&tmp, body.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| ArchiveError::io(path, e))
}

async fn write_file(path: &Path, bytes: &[u8]) -> ArchiveResult<()> {
    tokio::fs::write(path, bytes).await.map_err(|e| ArchiveError::io(path, e))
}

async fn create_dir(dir: &Path) -> ArchiveResult<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| ArchiveError::io(dir, e))
}

/// Read side: resolves a category into frame files, oldest first.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    root: PathBuf,
}

impl ArchiveReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn entries(&self, category: Category) -> ArchiveResult<Vec<PathBuf>> {
        let dir = self.root.join(category.dir_name());
        let listing = category.listing_name();
        let names = read_listing(&dir.join(&listing)).await?;

        if category != Category::Image {
            return Ok(names.into_iter().filter(|n| *n != listing).map(|n| dir.join(n)).collect());
        }

        let mut paths = Vec::new();
        for container in names {
            let segments = read_listing(&dir.join(format!("{container}_dir.ls"))).await?;
            let container_dir = dir.join(&container);
            paths.extend(segments.into_iter().map(|s| container_dir.join(s)));
        }
        Ok(paths)
    }
}

/// A missing listing is an empty category.
async fn read_listing(path: &Path) -> ArchiveResult<Vec<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(body) => Ok(body.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_owned).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(ArchiveError::io(path, e)),
    }
}

/// Archive writer task.
pub struct ArchiveWriter {
    pub frames: Receiver<TelemetryTransferFrame>,
    pub store: ArchiveStore,
}

impl ArchiveWriter {
    pub async fn run(mut self, ready: ReadySignal, cancel: CancellationToken) {
        ready.raise();
        info!("Archive writer started at {}", self.store.root().display());

        let mut written = 0u64;
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Archive writer cancelled");
                    break;
                }
                frame = self.frames.recv(Wait::Forever) => frame,
            };
            match frame {
                Ok(frame) => match self.store.write(&frame).await {
                    Ok(path) => {
                        written += 1;
                        debug!("Archived {}", path.display());
                    }
                    Err(e) => error!("Archive write failed, frame dropped: {}", e),
                },
                Err(ChannelError::Closed) => break,
                Err(e) => warn!("Archive receive failed: {}", e),
            }
        }

        info!("Archive writer ended ({} frames written)", written);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MissionTime;

    fn frame(apid: u16, grouping: GroupingFlag, seconds: u32, millis: u16) -> TelemetryTransferFrame {
        TelemetryTransferFrame::new(&seconds.to_le_bytes(), apid, grouping, 1, MissionTime::new(seconds, millis))
            .unwrap()
    }

    #[tokio::test]
    async fn listing_is_time_ordered() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::new(tmp.path());

        store.write(&frame(0xC8, GroupingFlag::Unsegmented, 100, 40)).await.unwrap();
        store.write(&frame(0xC8, GroupingFlag::Unsegmented, 99, 999)).await.unwrap();
        store.write(&frame(0xC8, GroupingFlag::Unsegmented, 100, 5)).await.unwrap();

        let listing = std::fs::read_to_string(tmp.path().join("mdq/mdq_dir.ls")).unwrap();
        assert_eq!(listing, "99_999.bin\n100_5.bin\n100_40.bin\n");

        let bytes = std::fs::read(tmp.path().join("mdq/100_5.bin")).unwrap();
        assert_eq!(bytes.len(), crate::codec::telemetry::TRANSFER_FRAME_LEN);
    }

    #[tokio::test]
    async fn image_segments_cluster_in_containers() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::new(tmp.path());

        store.write(&frame(0x64, GroupingFlag::First, 200, 0)).await.unwrap();
        for s in 0..10 {
            store.write(&frame(0x64, GroupingFlag::Continuation, 200, 10 + s)).await.unwrap();
        }
        store.write(&frame(0x64, GroupingFlag::Last, 201, 0)).await.unwrap();
        store.write(&frame(0x64, GroupingFlag::Unsegmented, 150, 0)).await.unwrap();

        let containers = std::fs::read_to_string(tmp.path().join("img/img_dir.ls")).unwrap();
        assert_eq!(containers, "150_0\n200_0\n");

        let segments = std::fs::read_to_string(tmp.path().join("img/200_0_dir.ls")).unwrap();
        let names: Vec<&str> = segments.lines().collect();
        assert_eq!(names.len(), 12);
        assert_eq!(&names[..3], &["1.bin", "2.bin", "3.bin"]);
        assert_eq!(names[11], "12.bin");

        let reader = ArchiveReader::new(tmp.path());
        let paths = reader.entries(Category::Image).await.unwrap();
        assert_eq!(paths.len(), 13);
        assert!(paths[0].ends_with("150_0/1.bin"));
        assert!(paths[1].ends_with("200_0/1.bin"));
        assert!(paths[12].ends_with("200_0/12.bin"));
    }

    #[tokio::test]
    async fn segment_without_container_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::new(tmp.path());

        let err = store.write(&frame(0x64, GroupingFlag::Continuation, 1, 0)).await.unwrap_err();
        assert!(matches!(err, ArchiveError::SegmentWithoutContainer { grouping: "continuation" }));

        store.write(&frame(0x64, GroupingFlag::First, 2, 0)).await.unwrap();
        store.write(&frame(0x64, GroupingFlag::Last, 3, 0)).await.unwrap();
        let err = store.write(&frame(0x64, GroupingFlag::Last, 4, 0)).await.unwrap_err();
        assert!(matches!(err, ArchiveError::SegmentWithoutContainer { .. }));
    }

    #[tokio::test]
    async fn relay_apid_has_no_category() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ArchiveStore::new(tmp.path());
        let err = store.write(&frame(0x12C, GroupingFlag::Unsegmented, 1, 0)).await.unwrap_err();
        assert!(matches!(err, ArchiveError::UncategorizedApid { apid: 0x12C }));
    }

    #[tokio::test]
    async fn empty_category_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let reader = ArchiveReader::new(tmp.path());
        assert!(reader.entries(Category::Housekeeping).await.unwrap().is_empty());
        assert!(reader.entries(Category::Image).await.unwrap().is_empty());
    }
}
