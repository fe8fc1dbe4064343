//! Archive passes: scan or sanitize every module entry of a JAR, then
//! replace the archive atomically when something changed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tempfile::NamedTempFile;
use zip::ZipArchive;
use zip::write::{FullFileOptions, SimpleFileOptions, ZipWriter};

use crate::classfile::Module;
use crate::error::{Error, Result};
use crate::incident::{Incident, IncidentSink};
use crate::pipeline::{Finding, Mode, Pipeline};

/// Entry that could not be processed; the pass continued without it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ModuleFailure {
    pub entry: String,
    pub reason: String,
}

/// Outcome of one archive pass.
#[derive(Clone, Debug, Serialize)]
pub struct ArchiveReport {
    archive_path: PathBuf,
    mode: Mode,
    findings: Vec<Finding>,
    modified_modules: BTreeSet<String>,
    failures: Vec<ModuleFailure>,
    module_count: usize,
}

impl ArchiveReport {
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Binary names of modules whose bytes changed.
    pub fn modified_modules(&self) -> &BTreeSet<String> {
        &self.modified_modules
    }

    pub fn failures(&self) -> &[ModuleFailure] {
        &self.failures
    }

    pub fn module_count(&self) -> usize {
        self.module_count
    }
}

/// Replacement content for an archive: rewritten entries by index plus new
/// entries appended at the end.
#[derive(Debug, Default)]
pub(crate) struct ArchiveEdit {
    pub(crate) replaced: BTreeMap<usize, Vec<u8>>,
    pub(crate) injected: Vec<(String, Vec<u8>)>,
}

impl ArchiveEdit {
    pub(crate) fn is_empty(&self) -> bool {
        self.replaced.is_empty() && self.injected.is_empty()
    }
}

/// Runs the processor pipeline over archives.
pub struct Orchestrator {
    pipeline: Pipeline,
    incidents: Option<Arc<dyn IncidentSink>>,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            incidents: None,
        }
    }

    /// Every finding is also submitted to `sink`, fire-and-forget.
    pub fn with_incident_sink(mut self, sink: Arc<dyn IncidentSink>) -> Self {
        self.incidents = Some(sink);
        self
    }

    pub fn scan(&self, path: &Path) -> Result<ArchiveReport> {
        self.process_archive(path, Mode::Scan)
    }

    pub fn sanitize(&self, path: &Path) -> Result<ArchiveReport> {
        self.process_archive(path, Mode::Sanitize)
    }

    pub fn process_archive(&self, path: &Path, mode: Mode) -> Result<ArchiveReport> {
        self.process_archive_with(path, mode, |file| file)
    }

    /// `wrap` decorates the staging file before entries are written to it.
    fn process_archive_with<W, F>(&self, path: &Path, mode: Mode, wrap: F) -> Result<ArchiveReport>
    where
        W: Write + Seek,
        F: FnOnce(File) -> W,
    {
        let mut archive = open_archive(path)?;
        let mut findings = Vec::new();
        let mut modified_modules = BTreeSet::new();
        let mut failures = Vec::new();
        let mut edit = ArchiveEdit::default();
        let mut module_count = 0;

        for index in 0..archive.len() {
            let Some((name, data)) = read_module_entry(&mut archive, index, path)? else {
                continue;
            };
            module_count += 1;
            let result = match self.pipeline.process(&data, mode) {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(archive = %path.display(), entry = %name, error = %err, "skipping module");
                    failures.push(ModuleFailure {
                        entry: name,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            tracing::debug!(entry = %name, findings = result.findings.len(), modified = result.modified, "module processed");
            self.report_incidents(path, &result.findings);
            findings.extend(result.findings);
            if mode.mutates() && result.output != data {
                modified_modules.insert(module_name(&result.output, &name));
                edit.replaced.insert(index, result.output);
            }
        }

        if !edit.is_empty() {
            write_archive(path, &mut archive, &edit, wrap)?;
            tracing::info!(
                archive = %path.display(),
                modules = modified_modules.len(),
                "archive sanitized"
            );
        } else {
            tracing::info!(archive = %path.display(), findings = findings.len(), ?mode, "archive unchanged");
        }

        Ok(ArchiveReport {
            archive_path: path.to_path_buf(),
            mode,
            findings,
            modified_modules,
            failures,
            module_count,
        })
    }

    fn report_incidents(&self, path: &Path, findings: &[Finding]) {
        let Some(sink) = &self.incidents else {
            return;
        };
        for finding in findings {
            sink.record(Incident {
                origin: path.display().to_string(),
                attributed_owner: Some(finding.module_name.clone()),
                detail: finding.message.clone(),
                context: format!("{} at {}", finding.rule_id, finding.location),
            });
        }
    }
}

pub(crate) fn is_module_entry(name: &str) -> bool {
    name.ends_with(".class") && !name.ends_with("module-info.class")
}

pub(crate) fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|err| Error::archive_read(path, err))?;
    ZipArchive::new(file).map_err(|err| Error::archive_read(path, err))
}

/// Reads entry `index` when it is a module entry.
pub(crate) fn read_module_entry(
    archive: &mut ZipArchive<File>,
    index: usize,
    path: &Path,
) -> Result<Option<(String, Vec<u8>)>> {
    let mut entry = archive
        .by_index(index)
        .map_err(|err| Error::archive_read(path, err))?;
    if entry.is_dir() || !is_module_entry(entry.name()) {
        return Ok(None);
    }
    let name = entry.name().to_string();
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|err| Error::archive_read(path, format!("{name}: {err}")))?;
    Ok(Some((name, data)))
}

fn module_name(bytes: &[u8], entry: &str) -> String {
    Module::parse(bytes)
        .and_then(|module| module.binary_name())
        .unwrap_or_else(|_| entry.trim_end_matches(".class").replace('/', "."))
}

/// Stages the edited archive next to `path` and renames it over the original.
///
/// The staging file lives in the same directory so the final rename stays on
/// one filesystem, where it is atomic. Any failure drops the staging file and
/// leaves the original untouched.
pub(crate) fn write_archive<W, F>(
    path: &Path,
    archive: &mut ZipArchive<File>,
    edit: &ArchiveEdit,
    wrap: F,
) -> Result<()>
where
    W: Write + Seek,
    F: FnOnce(File) -> W,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    // The staging file is created 0600; the original's mode is copied over
    // before the rename.
    let staging = NamedTempFile::new_in(&dir).map_err(|err| Error::archive_write(path, err))?;
    let file = staging
        .as_file()
        .try_clone()
        .map_err(|err| Error::archive_write(path, err))?;

    let mut writer = ZipWriter::new(wrap(file));
    copy_entries(archive, edit, &mut writer).map_err(|err| Error::archive_write(path, err))?;
    let mut inner = writer
        .finish()
        .map_err(|err| Error::archive_write(path, err))?;
    inner.flush().map_err(|err| Error::archive_write(path, err))?;
    drop(inner);
    let permissions = std::fs::metadata(path)
        .map_err(|err| Error::archive_write(path, err))?
        .permissions();
    staging
        .as_file()
        .set_permissions(permissions)
        .map_err(|err| Error::archive_write(path, err))?;
    staging
        .as_file()
        .sync_all()
        .map_err(|err| Error::archive_write(path, err))?;

    staging
        .persist(path)
        .map_err(|err| Error::archive_write(path, err.error))?;
    Ok(())
}

/// Extra field ids the writer manages itself.
const WRITER_EXTRA_FIELDS: [u16; 2] = [0x0001, 0x9901];

fn copy_entries<W: Write + Seek>(
    archive: &mut ZipArchive<File>,
    edit: &ArchiveEdit,
    writer: &mut ZipWriter<W>,
) -> anyhow::Result<()> {
    writer.set_raw_comment(archive.comment().into());
    for index in 0..archive.len() {
        match edit.replaced.get(&index) {
            Some(bytes) => {
                let (name, options) = {
                    let entry = archive.by_index_raw(index)?;
                    let mut options = FullFileOptions::default().compression_method(entry.compression());
                    if let Some(modified) = entry.last_modified() {
                        options = options.last_modified_time(modified);
                    }
                    if let Some(mode) = entry.unix_mode() {
                        options = options.unix_permissions(mode);
                    }
                    if let Some(extra) = entry.extra_data() {
                        copy_extra_fields(&mut options, entry.name(), extra);
                    }
                    (entry.name().to_string(), options)
                };
                writer.start_file(name, options)?;
                writer.write_all(bytes)?;
            }
            None => {
                let entry = archive.by_index_raw(index)?;
                writer.raw_copy_file(entry)?;
            }
        }
    }
    for (name, bytes) in &edit.injected {
        writer.start_file(name.as_str(), SimpleFileOptions::default())?;
        writer.write_all(bytes)?;
    }
    Ok(())
}

/// Re-adds the `(id, length, data)` blocks of an entry's extra field.
fn copy_extra_fields(options: &mut FullFileOptions<'_>, entry: &str, mut extra: &[u8]) {
    while extra.len() >= 4 {
        let id = u16::from_le_bytes([extra[0], extra[1]]);
        let len = usize::from(u16::from_le_bytes([extra[2], extra[3]]));
        let Some(data) = extra.get(4..4 + len) else {
            tracing::debug!(entry, "truncated extra field dropped");
            return;
        };
        if !WRITER_EXTRA_FIELDS.contains(&id) {
            let data: Box<[u8]> = data.into();
            if let Err(err) = options.add_extra_data(id, data, false) {
                tracing::debug!(entry, id, error = %err, "extra field dropped");
            }
        }
        extra = &extra[4 + len..];
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::AnnotationRemovalProcessor;
    use crate::rules::RuleRegistry;
    use crate::rules::heuristics::StringHeuristic;
    use crate::testing::ClassBuilder;
    use parking_lot::Mutex;
    use std::io;

    pub(crate) fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)]) {
        let file = File::create(path).expect("create jar");
        let mut writer = ZipWriter::new(file);
        for (name, bytes) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start entry");
            writer.write_all(bytes).expect("write entry");
        }
        writer.finish().expect("finish jar");
    }

    pub(crate) fn read_entry(path: &Path, name: &str) -> Option<Vec<u8>> {
        let mut archive = ZipArchive::new(File::open(path).expect("open jar")).expect("read jar");
        let mut entry = archive.by_name(name).ok()?;
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("read entry");
        Some(data)
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(path).expect("open jar")).expect("read jar");
        archive.file_names().map(str::to_string).collect::<Vec<_>>()
    }

    fn orchestrator() -> Orchestrator {
        let registry = RuleRegistry::new();
        registry
            .add_annotation_element_rule("EventHandler", Some("EventPriority"), Some("priority"))
            .expect("add rule");
        Orchestrator::new(Pipeline::standard(
            Arc::new(registry),
            AnnotationRemovalProcessor::new(Vec::<String>::new()).expect("removal"),
            StringHeuristic::default(),
        ))
    }

    fn listener() -> Vec<u8> {
        ClassBuilder::new("com/example/Listener")
            .method_annotation(
                "onJoin",
                "Lorg/bukkit/event/EventHandler;",
                &[("priority", "Lorg/bukkit/event/EventPriority;", "HIGH")],
            )
            .build()
    }

    fn clean() -> Vec<u8> {
        ClassBuilder::new("com/example/Clean")
            .invoke_virtual("run", "java/lang/String", "length", "()I")
            .build()
    }

    fn sample_jar(dir: &Path) -> PathBuf {
        let path = dir.join("sample.jar");
        write_jar(
            &path,
            &[
                ("plugin.yml", b"name: Sample\nmain: com.example.Listener\n".to_vec()),
                ("com/example/Listener.class", listener()),
                ("com/example/Clean.class", clean()),
                ("com/example/Broken.class", b"\xca\xfe\xba\xbe".to_vec()),
            ],
        );
        path
    }

    fn dir_listing(dir: &Path) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").path())
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn scan_reports_findings_and_isolates_malformed_modules() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = sample_jar(dir.path());
        let before = std::fs::read(&path).expect("read jar");

        let report = orchestrator().scan(&path).expect("scan");

        assert_eq!(1, report.findings().len());
        assert_eq!("com.example.Listener", report.findings()[0].module_name);
        assert_eq!(3, report.module_count());
        assert_eq!(1, report.failures().len());
        assert_eq!("com/example/Broken.class", report.failures()[0].entry);
        assert!(report.modified_modules().is_empty());
        assert_eq!(before, std::fs::read(&path).expect("read jar"));
    }

    #[test]
    fn sanitize_rewrites_only_modified_modules_and_keeps_entry_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = sample_jar(dir.path());
        let names_before = entry_names(&path);

        let report = orchestrator().sanitize(&path).expect("sanitize");

        assert_eq!(
            vec!["com.example.Listener".to_string()],
            report.modified_modules().iter().cloned().collect::<Vec<_>>()
        );
        assert_eq!(names_before, entry_names(&path));
        assert_eq!(Some(clean()), read_entry(&path, "com/example/Clean.class"));
        assert_eq!(
            Some(b"name: Sample\nmain: com.example.Listener\n".to_vec()),
            read_entry(&path, "plugin.yml")
        );
        assert_ne!(Some(listener()), read_entry(&path, "com/example/Listener.class"));
        assert_eq!(vec![path.clone()], dir_listing(dir.path()));

        let rescan = orchestrator().scan(&path).expect("rescan");
        assert!(rescan.findings().is_empty());
    }

    #[test]
    fn sanitize_twice_is_byte_identical() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = sample_jar(dir.path());
        orchestrator().sanitize(&path).expect("first sanitize");
        let once = std::fs::read(&path).expect("read jar");

        let report = orchestrator().sanitize(&path).expect("second sanitize");

        assert!(report.modified_modules().is_empty());
        assert_eq!(once, std::fs::read(&path).expect("read jar"));
    }

    #[test]
    fn sanitize_without_findings_leaves_archive_untouched() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("clean.jar");
        write_jar(&path, &[("com/example/Clean.class", clean())]);
        let before = std::fs::read(&path).expect("read jar");
        let modified_before = std::fs::metadata(&path).expect("metadata").modified().expect("mtime");

        let report = orchestrator().sanitize(&path).expect("sanitize");

        assert!(report.findings().is_empty());
        assert_eq!(before, std::fs::read(&path).expect("read jar"));
        assert_eq!(
            modified_before,
            std::fs::metadata(&path).expect("metadata").modified().expect("mtime")
        );
        assert_eq!(vec![path.clone()], dir_listing(dir.path()));
    }

    /// Writer that fails once `budget` bytes have been written.
    struct FailingWriter {
        inner: File,
        budget: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.budget {
                return Err(io::Error::other("injected write failure"));
            }
            self.budget -= buf.len();
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for FailingWriter {
        fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn failed_finalization_leaves_original_unchanged() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = sample_jar(dir.path());
        let before = std::fs::read(&path).expect("read jar");

        for budget in [0, 16, 64, 256] {
            let err = orchestrator()
                .process_archive_with(&path, Mode::Sanitize, |inner| FailingWriter { inner, budget })
                .expect_err("injected failure");

            assert!(matches!(err, Error::ArchiveWrite { .. }), "budget {budget}: {err}");
            assert_eq!(before, std::fs::read(&path).expect("read jar"));
            assert_eq!(vec![path.clone()], dir_listing(dir.path()));
        }
    }

    #[test]
    fn unreadable_archive_is_an_archive_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("broken.jar");
        std::fs::write(&path, b"not a zip").expect("write file");

        let err = orchestrator().scan(&path).expect_err("read error");

        assert!(matches!(err, Error::ArchiveRead { .. }));
        assert_eq!(b"not a zip".to_vec(), std::fs::read(&path).expect("read file"));
        assert!(matches!(
            orchestrator().scan(&dir.path().join("missing.jar")),
            Err(Error::ArchiveRead { .. })
        ));
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<Incident>>);

    impl IncidentSink for CollectingSink {
        fn record(&self, incident: Incident) {
            self.0.lock().push(incident);
        }
    }

    #[test]
    fn findings_are_forwarded_to_the_incident_sink() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = sample_jar(dir.path());
        let sink = Arc::new(CollectingSink::default());

        orchestrator()
            .with_incident_sink(sink.clone())
            .scan(&path)
            .expect("scan");

        let incidents = sink.0.lock();
        assert_eq!(1, incidents.len());
        assert_eq!(Some("com.example.Listener".to_string()), incidents[0].attributed_owner);
        assert_eq!("annotation-element-001 at method:onJoin", incidents[0].context);
    }

    #[cfg(unix)]
    #[test]
    fn sanitize_keeps_archive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("temp dir");
        let path = sample_jar(dir.path());
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).expect("chmod");

        let report = orchestrator().sanitize(&path).expect("sanitize");

        assert_eq!(1, report.modified_modules().len());
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(0o644, mode & 0o777);
    }

    #[test]
    fn rewritten_entries_keep_their_metadata_and_the_archive_comment() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("stamped.jar");
        let stamp = zip::DateTime::from_date_and_time(2020, 5, 17, 10, 20, 30).expect("timestamp");
        let mut options = FullFileOptions::default()
            .last_modified_time(stamp)
            .unix_permissions(0o640);
        let marker: Box<[u8]> = Box::from(&[1u8, 2, 3][..]);
        options
            .add_extra_data(0x6a73, marker, false)
            .expect("extra field");
        let mut writer = ZipWriter::new(File::create(&path).expect("create jar"));
        writer.set_comment("built for jarsweep");
        writer
            .start_file("com/example/Listener.class", options)
            .expect("start entry");
        writer.write_all(&listener()).expect("write entry");
        writer.finish().expect("finish jar");

        let report = orchestrator().sanitize(&path).expect("sanitize");
        assert_eq!(1, report.modified_modules().len());

        let mut archive = ZipArchive::new(File::open(&path).expect("open jar")).expect("read jar");
        assert_eq!(b"built for jarsweep", archive.comment());
        let entry = archive.by_name("com/example/Listener.class").expect("entry");
        assert_eq!(Some(stamp), entry.last_modified());
        assert_eq!(Some(0o640), entry.unix_mode().map(|mode| mode & 0o777));
        let extra = entry.extra_data().unwrap_or_default();
        assert!(
            extra.windows(7).any(|block| block == [0x73, 0x6a, 3, 0, 1, 2, 3]),
            "extra field {extra:?}"
        );
    }
}
