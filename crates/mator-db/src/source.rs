//! Descriptor sources backed by local files.
//!
//! A [`FileSource`] root is one of:
//!
//! - a `.tar.xz` archive as CollecTor publishes it, every regular entry
//!   read as one document;
//! - a single document, optionally gzipped;
//! - a directory walked recursively in file-name order, as the archives
//!   unpack.

use std::{
  fs::File,
  io::{self, BufReader, Read},
  ops::ControlFlow,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use mator_core::{
  descriptor::RelayDescriptor,
  month::TargetMonth,
  source::{DescriptorSource, SourceStats},
};
use tracing::{debug, warn};
use walkdir::WalkDir;
use xz2::read::XzDecoder;

use crate::{BuilderConfig, Error, Result, pipeline::Sources};

/// Suffixes tried after the bare archive path, in order.
const ARCHIVE_SUFFIXES: [&str; 2] = [".tar.xz", ".gz"];

#[derive(Debug, Clone)]
pub struct FileSource {
  name: String,
  root: PathBuf,
}

impl FileSource {
  pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
    Self { name: name.into(), root: root.into() }
  }

  /// Find the archive at `base`, `base.tar.xz` or `base.gz`.
  pub fn locate(name: impl Into<String>, base: &Path) -> Option<Self> {
    let name = name.into();
    if base.exists() {
      return Some(Self::new(name, base));
    }
    ARCHIVE_SUFFIXES.iter().find_map(|suffix| {
      let mut candidate = base.as_os_str().to_owned();
      candidate.push(suffix);
      let candidate = PathBuf::from(candidate);
      candidate.exists().then(|| Self::new(name.clone(), candidate))
    })
  }

  pub fn root(&self) -> &Path { &self.root }
}

impl DescriptorSource for FileSource {
  type Error = io::Error;

  fn name(&self) -> &str { &self.name }

  fn process<F>(&mut self, mut handler: F) -> io::Result<SourceStats>
  where
    F: FnMut(RelayDescriptor) -> ControlFlow<()>,
  {
    let mut stats = SourceStats::default();

    if !self.root.is_dir() {
      if is_tar_xz(&self.root) {
        read_archive(&self.root, &mut stats, &mut handler)?;
      } else {
        read_document(&self.root, &mut stats, &mut handler)?;
      }
      return Ok(stats);
    }

    for entry in WalkDir::new(&self.root).follow_links(true).sort_by_file_name() {
      let entry = entry?;
      if !entry.file_type().is_file() {
        continue;
      }
      if read_document(entry.path(), &mut stats, &mut handler)?.is_break() {
        break;
      }
    }
    Ok(stats)
  }
}

/// The sources of one run under `cfg`.
///
/// The main archive is required unless `month` is the current month, which
/// CollecTor has not archived yet. The previous month's archive seeds the
/// month start when present. Recent files are read only for the current
/// month.
pub fn locate_sources(
  cfg: &BuilderConfig,
  month: TargetMonth,
  now: DateTime<Utc>,
) -> Result<Sources<FileSource>> {
  let current = month.is_current(now);

  let main_base = cfg.archive_base(month);
  let main = FileSource::locate("main", &main_base);
  if main.is_none() {
    if !current {
      return Err(Error::MissingArchive(main_base));
    }
    warn!(path = %main_base.display(), "main archive not found");
  }

  let complementary_base = cfg.archive_base(month.previous());
  let complementary = FileSource::locate("complementary", &complementary_base);
  if complementary.is_none() {
    warn!(path = %complementary_base.display(), "complementary archive not found");
  }

  let mut recent = Vec::new();
  if current {
    let dir = cfg.recent_dir();
    match std::fs::read_dir(&dir) {
      Ok(entries) => {
        let mut paths: Vec<PathBuf> = entries
          .filter_map(|e| e.ok())
          .map(|e| e.path())
          .filter(|p| p.is_file())
          .collect();
        paths.sort();
        recent.extend(paths.into_iter().map(|p| FileSource::new("recent", p)));
      }
      Err(e) => warn!(path = %dir.display(), error = %e, "recent descriptors unavailable"),
    }
  }

  Ok(Sources { main, complementary, recent })
}

fn is_tar_xz(path: &Path) -> bool {
  path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(".tar.xz"))
}

fn read_archive<F>(path: &Path, stats: &mut SourceStats, handler: &mut F) -> io::Result<()>
where
  F: FnMut(RelayDescriptor) -> ControlFlow<()>,
{
  let file = File::open(path)?;
  let mut archive = tar::Archive::new(XzDecoder::new(BufReader::new(file)));

  for entry in archive.entries()? {
    let mut entry = entry?;
    if !entry.header().entry_type().is_file() {
      continue;
    }
    let name = entry.path()?.display().to_string();
    let mut raw = Vec::new();
    entry.read_to_end(&mut raw)?;
    if parse_document(&name, &raw, stats, handler).is_break() {
      break;
    }
  }
  Ok(())
}

fn read_document<F>(
  path: &Path,
  stats: &mut SourceStats,
  handler: &mut F,
) -> io::Result<ControlFlow<()>>
where
  F: FnMut(RelayDescriptor) -> ControlFlow<()>,
{
  let file = File::open(path)?;
  let is_gzip = path.extension().is_some_and(|ext| ext == "gz");
  let mut reader: Box<dyn Read> = if is_gzip {
    Box::new(GzDecoder::new(BufReader::new(file)))
  } else {
    Box::new(BufReader::new(file))
  };

  let mut raw = Vec::new();
  reader.read_to_end(&mut raw)?;
  Ok(parse_document(&path.display().to_string(), &raw, stats, handler))
}

fn parse_document<F>(
  name: &str,
  raw: &[u8],
  stats: &mut SourceStats,
  handler: &mut F,
) -> ControlFlow<()>
where
  F: FnMut(RelayDescriptor) -> ControlFlow<()>,
{
  // Contact lines are free text and not always UTF-8.
  let text = String::from_utf8_lossy(raw);

  let mut document = SourceStats { documents: 1, ..Default::default() };
  let mut flow = ControlFlow::Continue(());
  for parsed in mator_descriptor::parse_many(&text) {
    match parsed {
      Ok(descriptor) => {
        document.descriptors += 1;
        flow = handler(descriptor);
        if flow.is_break() {
          break;
        }
      }
      Err(e) => {
        document.malformed += 1;
        warn!(document = name, error = %e, "dropping malformed descriptor");
      }
    }
  }
  debug!(
    document = name,
    descriptors = document.descriptors,
    malformed = document.malformed,
    "read document"
  );
  stats.merge(document);
  flow
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use chrono::TimeZone;
  use flate2::{Compression, write::GzEncoder};
  use xz2::write::XzEncoder;

  use super::*;

  const ONE: &str = "\
@type server-descriptor 1.0
router alpha 1.2.3.4 9001 0 0
platform Tor 0.4.2.6 on Linux
published 2020-03-02 10:00:00
fingerprint AAAA AAAA AAAA AAAA AAAA AAAA AAAA AAAA AAAA AAAA
bandwidth 1000 2000 500
reject *:*
router-signature
-----BEGIN SIGNATURE-----
c2ln
-----END SIGNATURE-----
";

  const BROKEN: &str = "\
router beta 5.6.7.8 9001 0 0
bandwidth 1 2 3
-----END SIGNATURE-----
";

  fn collect(source: &mut FileSource) -> (Vec<RelayDescriptor>, SourceStats) {
    let mut out = Vec::new();
    let stats = source
      .process(|d| {
        out.push(d);
        ControlFlow::Continue(())
      })
      .unwrap();
    (out, stats)
  }

  #[test]
  fn reads_plain_file_and_counts_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("2020-03-02-10-00-00-server-descriptors");
    std::fs::write(&path, format!("{ONE}{BROKEN}")).unwrap();

    let (descriptors, stats) = collect(&mut FileSource::new("main", &path));
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].nickname, "alpha");
    assert_eq!(stats, SourceStats { documents: 1, descriptors: 1, malformed: 1 });
  }

  #[test]
  fn reads_gzipped_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server-descriptors-2020-03.gz");
    let mut gz = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    gz.write_all(ONE.as_bytes()).unwrap();
    gz.finish().unwrap();

    let (descriptors, stats) = collect(&mut FileSource::new("main", &path));
    assert_eq!(descriptors.len(), 1);
    assert_eq!(stats.documents, 1);
  }

  #[test]
  fn walks_directory_tree() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::write(dir.path().join("one"), ONE).unwrap();
    std::fs::write(nested.join("two"), ONE.replace("alpha", "gamma")).unwrap();
    std::fs::write(nested.join("empty"), "").unwrap();

    let (descriptors, stats) = collect(&mut FileSource::new("recent", dir.path()));
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.descriptors, 2);
    let mut names: Vec<_> = descriptors.iter().map(|d| d.nickname.as_str()).collect();
    names.sort();
    assert_eq!(names, ["alpha", "gamma"]);
  }

  #[test]
  fn locate_prefers_plain_then_gz() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("server-descriptors-2020-03");
    assert!(FileSource::locate("main", &base).is_none());

    std::fs::write(dir.path().join("server-descriptors-2020-03.gz"), b"").unwrap();
    let found = FileSource::locate("main", &base).unwrap();
    assert!(found.root().ends_with("server-descriptors-2020-03.gz"));

    std::fs::create_dir(&base).unwrap();
    let found = FileSource::locate("main", &base).unwrap();
    assert_eq!(found.root(), base);
  }

  #[test]
  fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FileSource::new("main", dir.path().join("nope"));
    assert!(source.process(|_| ControlFlow::Continue(())).is_err());
  }
  fn write_tar_xz(path: &Path, entries: &[(&str, &str)]) {
    let xz = XzEncoder::new(File::create(path).unwrap(), 6);
    let mut tar = tar::Builder::new(xz);
    for (name, body) in entries {
      let mut header = tar::Header::new_gnu();
      header.set_size(body.len() as u64);
      header.set_mode(0o644);
      header.set_cksum();
      tar.append_data(&mut header, name, body.as_bytes()).unwrap();
    }
    tar.into_inner().unwrap().finish().unwrap();
  }

  #[test]
  fn reads_every_entry_of_tar_xz_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server-descriptors-2020-03.tar.xz");
    let two = format!("{}{BROKEN}", ONE.replace("alpha", "gamma"));
    write_tar_xz(&path, &[
      ("server-descriptors-2020-03/a/one", ONE),
      ("server-descriptors-2020-03/b/two", two.as_str()),
    ]);

    let (descriptors, stats) = collect(&mut FileSource::new("main", &path));
    assert_eq!(stats, SourceStats { documents: 2, descriptors: 2, malformed: 1 });
    let names: Vec<_> = descriptors.iter().map(|d| d.nickname.as_str()).collect();
    assert_eq!(names, ["alpha", "gamma"]);
  }

  #[test]
  fn locate_finds_tar_xz_before_gz() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("server-descriptors-2020-03");
    std::fs::write(dir.path().join("server-descriptors-2020-03.gz"), b"").unwrap();
    std::fs::write(dir.path().join("server-descriptors-2020-03.tar.xz"), b"").unwrap();

    let found = FileSource::locate("main", &base).unwrap();
    assert!(found.root().ends_with("server-descriptors-2020-03.tar.xz"));
  }

  #[test]
  fn handler_break_stops_reading() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("one"), format!("{ONE}{}", ONE.replace("alpha", "beta"))).unwrap();
    std::fs::write(dir.path().join("two"), ONE.replace("alpha", "gamma")).unwrap();

    let mut seen = Vec::new();
    let stats = FileSource::new("main", dir.path())
      .process(|d| {
        seen.push(d.nickname);
        ControlFlow::Break(())
      })
      .unwrap();
    assert_eq!(seen, ["alpha"]);
    assert_eq!(stats.descriptors, 1);
  }

  fn config_in(dir: &Path) -> BuilderConfig {
    BuilderConfig { data_dir: dir.to_path_buf(), ..Default::default() }
  }

  #[test]
  fn missing_main_archive_is_fatal_for_past_months() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc.with_ymd_and_hms(2020, 5, 10, 0, 0, 0).unwrap();
    let march = TargetMonth::new(2020, 3).unwrap();

    let err = locate_sources(&config_in(dir.path()), march, now).unwrap_err();
    assert!(matches!(err, Error::MissingArchive(path) if path.ends_with("server-descriptors-2020-03")));
  }

  #[test]
  fn current_month_tolerates_missing_main_archive() {
    let dir = tempfile::tempdir().unwrap();
    let recent = dir.path().join("recent");
    std::fs::create_dir(&recent).unwrap();
    std::fs::write(recent.join("2020-05-09-00-00-00-server-descriptors"), ONE).unwrap();
    write_tar_xz(&dir.path().join("server-descriptors-2020-04.tar.xz"), &[("x", ONE)]);
    let now = Utc.with_ymd_and_hms(2020, 5, 10, 0, 0, 0).unwrap();

    let sources =
      locate_sources(&config_in(dir.path()), TargetMonth::new(2020, 5).unwrap(), now).unwrap();
    assert!(sources.main.is_none());
    assert!(sources.complementary.unwrap().root().ends_with("server-descriptors-2020-04.tar.xz"));
    assert_eq!(sources.recent.len(), 1);
  }

  #[test]
  fn past_month_ignores_recent_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("recent")).unwrap();
    std::fs::write(dir.path().join("recent").join("r"), ONE).unwrap();
    std::fs::write(dir.path().join("server-descriptors-2020-03"), ONE).unwrap();
    let now = Utc.with_ymd_and_hms(2020, 5, 10, 0, 0, 0).unwrap();

    let sources =
      locate_sources(&config_in(dir.path()), TargetMonth::new(2020, 3).unwrap(), now).unwrap();
    assert!(sources.main.is_some());
    assert!(sources.complementary.is_none());
    assert!(sources.recent.is_empty());
  }
}
