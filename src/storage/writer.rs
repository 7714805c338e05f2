use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::HarvestError;
use crate::models::Record;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Consumer of harvested record batches.
///
/// `write` receives the `<record>` children of one `ListRecords` response,
/// in server order, and returns the most recent header datestamp observed
/// so far across all batches (or `None` if no record carried one).
///
/// Implementations must be idempotent per resumption token: a cancelled
/// run re-issues the request for the last checkpointed token, so the same
/// batch may be written twice.
pub trait RecordWriter {
    fn write(&mut self, records: &[Record]) -> Result<Option<String>, HarvestError>;
}

/// Writes one XML file per record into a target directory.
///
/// File names derive from the sanitized header identifier, so replaying a
/// batch overwrites the same files instead of duplicating records. Records
/// without an identifier fall back to a positional name and are logged.
pub struct DirectoryWriter {
    dir: PathBuf,
    batches_written: u64,
    latest_datestamp: Option<String>,
}

impl DirectoryWriter {
    /// Opens (creating if necessary) the output directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| HarvestError::Writer(e.to_string()))?;
        Ok(Self {
            dir,
            batches_written: 0,
            latest_datestamp: None,
        })
    }

    fn write_atomic(&self, filename: &str, content: &str) -> Result<(), HarvestError> {
        let mut tmp =
            NamedTempFile::new_in(&self.dir).map_err(|e| HarvestError::Writer(e.to_string()))?;
        tmp.write_all(content.as_bytes())
            .and_then(|()| tmp.flush())
            .map_err(|e| HarvestError::Writer(e.to_string()))?;
        tmp.persist(self.dir.join(filename))
            .map_err(|e| HarvestError::Writer(e.error.to_string()))?;
        Ok(())
    }

    fn observe_datestamp(&mut self, record: &Record) {
        if let Some(datestamp) = &record.datestamp {
            let newer = self
                .latest_datestamp
                .as_deref()
                .map_or(true, |current| datestamp.as_str() > current);
            if newer {
                self.latest_datestamp = Some(datestamp.clone());
            }
        }
    }
}

impl RecordWriter for DirectoryWriter {
    fn write(&mut self, records: &[Record]) -> Result<Option<String>, HarvestError> {
        for (index, record) in records.iter().enumerate() {
            let filename = match &record.identifier {
                Some(identifier) => format!("{}.xml", sanitize_identifier(identifier)),
                None => {
                    warn!(
                        batch = self.batches_written,
                        index, "record without header identifier, using positional name"
                    );
                    format!("batch{:06}_{:04}.xml", self.batches_written, index)
                }
            };
            let content = format!("{}\n{}\n", XML_DECLARATION, record.raw);
            self.write_atomic(&filename, &content)?;
            self.observe_datestamp(record);
        }
        self.batches_written += 1;
        Ok(self.latest_datestamp.clone())
    }
}

/// Maps a record identifier onto a safe file stem.
fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(identifier: &str, datestamp: &str) -> Record {
        Record {
            raw: format!(
                "<record><header><identifier>{}</identifier><datestamp>{}</datestamp></header></record>",
                identifier, datestamp
            ),
            identifier: Some(identifier.to_string()),
            datestamp: Some(datestamp.to_string()),
        }
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("oai:repo:12/3"), "oai_repo_12_3");
        assert_eq!(sanitize_identifier("plain-id.1"), "plain-id.1");
    }

    #[test]
    fn test_writes_one_file_per_record() {
        let dir = tempdir().unwrap();
        let mut writer = DirectoryWriter::new(dir.path()).unwrap();

        writer
            .write(&[
                record("oai:repo:1", "2016-07-01"),
                record("oai:repo:2", "2016-07-02"),
            ])
            .unwrap();

        let first = std::fs::read_to_string(dir.path().join("oai_repo_1.xml")).unwrap();
        assert!(first.starts_with(XML_DECLARATION));
        assert!(first.contains("oai:repo:1"));
        assert!(dir.path().join("oai_repo_2.xml").exists());
    }

    #[test]
    fn test_latest_datestamp_spans_batches() {
        let dir = tempdir().unwrap();
        let mut writer = DirectoryWriter::new(dir.path()).unwrap();

        let latest = writer.write(&[record("a", "2016-07-02")]).unwrap();
        assert_eq!(latest.as_deref(), Some("2016-07-02"));

        // an older batch must not move the datestamp backwards
        let latest = writer.write(&[record("b", "2016-07-01")]).unwrap();
        assert_eq!(latest.as_deref(), Some("2016-07-02"));

        let latest = writer.write(&[record("c", "2016-07-03")]).unwrap();
        assert_eq!(latest.as_deref(), Some("2016-07-03"));
    }

    #[test]
    fn test_replaying_a_batch_overwrites() {
        let dir = tempdir().unwrap();
        let mut writer = DirectoryWriter::new(dir.path()).unwrap();

        writer.write(&[record("oai:repo:1", "2016-07-01")]).unwrap();
        writer.write(&[record("oai:repo:1", "2016-07-01")]).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(files, vec!["oai_repo_1.xml"]);
    }

    #[test]
    fn test_record_without_identifier_gets_positional_name() {
        let dir = tempdir().unwrap();
        let mut writer = DirectoryWriter::new(dir.path()).unwrap();

        writer
            .write(&[Record {
                raw: "<record/>".to_string(),
                identifier: None,
                datestamp: None,
            }])
            .unwrap();

        assert!(dir.path().join("batch000000_0000.xml").exists());
    }

    #[test]
    fn test_records_without_datestamp_return_none() {
        let dir = tempdir().unwrap();
        let mut writer = DirectoryWriter::new(dir.path()).unwrap();

        let latest = writer
            .write(&[Record {
                raw: "<record/>".to_string(),
                identifier: Some("x".to_string()),
                datestamp: None,
            }])
            .unwrap();
        assert_eq!(latest, None);
    }
}
