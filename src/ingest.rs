// Streaming ingestion pipeline
//
// One producer reads the source and groups rows into small batches, a fixed
// pool of worker threads parses them and sends the valid records back. All
// coordination goes through bounded channels:
//
//   producer --(batches, cap N)--> workers --(records)--> collector
//                                     \--(row errors, lossy cap)--> report
//
// A full batch channel blocks the producer, so memory stays bounded no
// matter how large the input is. Output order is not the input order.

use crate::record::{MalformedRecord, RecordParser};
use csv::StringRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;
use thiserror::Error;
use tracing::{debug, info, warn};

// Fatal errors abort the whole run
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("cannot open source {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read header row: {0}")]
    Header(#[source] csv::Error),

    #[error("source is empty, expected a header row")]
    EmptySource,

    #[error("read failed after {rows_read} rows: {source}")]
    Read {
        rows_read: u64,
        #[source]
        source: csv::Error,
    },
}

/// A row that could not be turned into a record. The run continues without it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {}: {}", display_line(.line), .cause)]
pub struct RowError {
    pub line: Option<u64>,
    pub cause: MalformedRecord,
}

fn display_line(line: &Option<u64>) -> String {
    line.map_or_else(|| "?".to_string(), |l| l.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub workers: usize,
    pub batch_channel_capacity: usize,
    pub error_capacity: usize,
    pub progress_interval: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let cpus = thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            batch_size: 100,
            workers: cpus * 2,
            batch_channel_capacity: 1,
            error_capacity: 10,
            progress_interval: 10_000,
        }
    }
}

#[derive(Debug)]
pub struct IngestReport<R> {
    pub records: Vec<R>,
    pub rows_read: u64,
    pub rows_skipped: u64,
    // Only the errors that fit into the error channel are kept
    pub errors: Vec<RowError>,
    pub error_count: u64,
    pub dropped_errors: u64,
}

/// Counters of a streaming run, whose records went to a sink instead of
/// being collected.
#[derive(Debug, Default)]
pub struct IngestCounts {
    pub records: u64,
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub errors: Vec<RowError>,
    pub error_count: u64,
    pub dropped_errors: u64,
}

type Batch = Vec<(Option<u64>, StringRecord)>;

#[derive(Debug, Default)]
struct ReadTotals {
    rows_read: u64,
    rows_skipped: u64,
}

// Shared counters, updated by workers and the producer
struct Progress {
    processed: AtomicU64,
    errors: AtomicU64,
    dropped_errors: AtomicU64,
    interval: u64,
}

impl Progress {
    fn new(interval: u64) -> Self {
        Self {
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            dropped_errors: AtomicU64::new(0),
            interval: interval.max(1),
        }
    }

    fn advance(&self, rows: u64) {
        let before = self.processed.fetch_add(rows, Ordering::Relaxed);
        let after = before + rows;
        if after / self.interval > before / self.interval {
            info!(rows = after, "ingestion progress");
        }
    }

    fn report(&self, errors: &SyncSender<RowError>, error: RowError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if errors.try_send(error).is_err() {
            self.dropped_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub fn csv_reader<R: io::Read>(source: R, delimiter: u8) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source)
}

pub struct Ingestor {
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Run the pipeline to the end of the source.
    ///
    /// Malformed rows are dropped and reported in the returned report. Only a
    /// missing or unreadable header, or an I/O failure while streaming, ends
    /// the run with an error.
    pub fn run<R, P>(
        &self,
        reader: csv::Reader<R>,
        parser: &P,
    ) -> Result<IngestReport<P::Record>, IngestError>
    where
        R: io::Read + Send,
        P: RecordParser,
    {
        let mut records = Vec::new();
        let counts = self.run_into(reader, parser, |batch| {
            records.extend(batch);
            true
        })?;

        Ok(IngestReport {
            records,
            rows_read: counts.rows_read,
            rows_skipped: counts.rows_skipped,
            errors: counts.errors,
            error_count: counts.error_count,
            dropped_errors: counts.dropped_errors,
        })
    }

    /// Like [`Ingestor::run`], but every parsed batch goes to `sink` on the
    /// calling thread as soon as a worker finishes it. A blocking sink holds
    /// back the whole pipeline.
    ///
    /// Once `sink` returns `false` the remaining batches are parsed and
    /// discarded so the source is still read to the end.
    pub fn run_into<R, P, F>(
        &self,
        mut reader: csv::Reader<R>,
        parser: &P,
        mut sink: F,
    ) -> Result<IngestCounts, IngestError>
    where
        R: io::Read + Send,
        P: RecordParser,
        F: FnMut(Vec<P::Record>) -> bool,
    {
        let header = reader.headers().map_err(IngestError::Header)?;
        if header.is_empty() {
            return Err(IngestError::EmptySource);
        }

        let workers = self.config.workers.max(1);
        let batch_size = self.config.batch_size.max(1);
        let min_columns = parser.min_columns();

        let (batch_tx, batch_rx) = sync_channel::<Batch>(self.config.batch_channel_capacity);
        let (result_tx, result_rx) = sync_channel::<Vec<P::Record>>(workers);
        let (error_tx, error_rx) = sync_channel::<RowError>(self.config.error_capacity);
        let batch_rx = Mutex::new(batch_rx);
        let progress = Progress::new(self.config.progress_interval);

        debug!(workers, batch_size, min_columns, "starting ingestion");

        let (delivered, totals) = thread::scope(|scope| {
            for worker in 0..workers {
                let result_tx = result_tx.clone();
                let error_tx = error_tx.clone();
                let batch_rx = &batch_rx;
                let progress = &progress;
                scope.spawn(move || {
                    parse_batches(worker, batch_rx, parser, &result_tx, &error_tx, progress)
                });
            }
            drop(result_tx);

            let producer_errors = error_tx;
            let progress = &progress;
            let producer = scope.spawn(move || {
                produce(
                    reader,
                    batch_tx,
                    &producer_errors,
                    progress,
                    batch_size,
                    min_columns,
                )
            });

            let mut delivered = 0u64;
            let mut accepting = true;
            for parsed in result_rx {
                if !accepting {
                    continue;
                }
                let count = parsed.len() as u64;
                if sink(parsed) {
                    delivered += count;
                } else {
                    accepting = false;
                    debug!(delivered, "record sink closed, discarding the rest");
                }
            }

            let totals = producer
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            (delivered, totals)
        });
        let totals = totals?;

        let errors: Vec<RowError> = error_rx.try_iter().collect();
        let error_count = progress.errors.load(Ordering::Relaxed);
        let dropped_errors = progress.dropped_errors.load(Ordering::Relaxed);

        for error in &errors {
            warn!(%error, "skipped malformed row");
        }
        info!(
            rows_read = totals.rows_read,
            rows_skipped = totals.rows_skipped,
            records = delivered,
            error_count,
            dropped_errors,
            "ingestion finished"
        );

        Ok(IngestCounts {
            records: delivered,
            rows_read: totals.rows_read,
            rows_skipped: totals.rows_skipped,
            errors,
            error_count,
            dropped_errors,
        })
    }
}

fn produce<R: io::Read>(
    mut reader: csv::Reader<R>,
    batches: SyncSender<Batch>,
    errors: &SyncSender<RowError>,
    progress: &Progress,
    batch_size: usize,
    min_columns: usize,
) -> Result<ReadTotals, IngestError> {
    let mut totals = ReadTotals::default();
    let mut batch: Batch = Vec::with_capacity(batch_size);
    let mut row = StringRecord::new();

    loop {
        match reader.read_record(&mut row) {
            Ok(true) => {
                totals.rows_read += 1;
                if row.len() < min_columns {
                    totals.rows_skipped += 1;
                    continue;
                }
                let line = row.position().map(|p| p.line());
                batch.push((line, row.clone()));
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if batches.send(full).is_err() {
                        break;
                    }
                }
            }
            Ok(false) => break,
            Err(source) if source.is_io_error() => {
                return Err(IngestError::Read {
                    rows_read: totals.rows_read,
                    source,
                });
            }
            Err(error) => {
                totals.rows_read += 1;
                let line = error.position().map(|p| p.line());
                progress.report(
                    errors,
                    RowError {
                        line,
                        cause: MalformedRecord::new("row", "", error.to_string()),
                    },
                );
            }
        }
    }

    if !batch.is_empty() {
        let _ = batches.send(batch);
    }
    Ok(totals)
}

fn parse_batches<P: RecordParser>(
    worker: usize,
    batches: &Mutex<Receiver<Batch>>,
    parser: &P,
    results: &SyncSender<Vec<P::Record>>,
    errors: &SyncSender<RowError>,
    progress: &Progress,
) {
    loop {
        let next = batches.lock().recv();
        let Ok(batch) = next else {
            break;
        };

        let mut parsed = Vec::with_capacity(batch.len());
        for (line, row) in &batch {
            match parser.parse(row) {
                Ok(record) => parsed.push(record),
                Err(cause) => progress.report(errors, RowError { line: *line, cause }),
            }
        }

        progress.advance(batch.len() as u64);
        if !parsed.is_empty() && results.send(parsed).is_err() {
            break;
        }
    }
    debug!(worker, "ingestion worker done");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HotelId;
    use crate::record::{HotelParser, OfferParser};
    use std::collections::HashSet;
    use std::io::Read;

    const OFFERS_HEADER: &str = "hotelid,outbounddeparturedatetime,inbounddeparturedatetime,countadults,countchildren,price,inbounddepartureairport,inboundarrivalairport,inboundarrivaldatetime,outbounddepartureairport,outboundarrivalairport,outboundarrivaldatetime,mealtype,oceanview,roomtype";

    fn offer_line(hotel: u32, price: &str) -> String {
        format!(
            "{},2025-08-10T06:00:00Z,2025-08-17T18:00:00Z,2,0,{},PMI,FRA,2025-08-17T20:00:00Z,FRA,PMI,2025-08-10T08:00:00Z,none,false,double",
            hotel, price
        )
    }

    fn offers_csv(lines: &[String]) -> String {
        let mut csv = String::from(OFFERS_HEADER);
        for line in lines {
            csv.push('\n');
            csv.push_str(line);
        }
        csv.push('\n');
        csv
    }

    fn config(workers: usize, batch_size: usize) -> IngestConfig {
        IngestConfig {
            batch_size,
            workers,
            batch_channel_capacity: 1,
            error_capacity: 10,
            progress_interval: 50,
        }
    }

    fn run_offers(csv: &str, config: IngestConfig) -> Result<IngestReport<crate::models::Offer>, IngestError> {
        Ingestor::new(config).run(csv_reader(csv.as_bytes(), b','), &OfferParser::default())
    }

    #[test]
    fn test_parses_all_valid_rows() {
        let lines: Vec<String> = (1..=250).map(|i| offer_line(i % 7, &format!("{}.50", i))).collect();
        let report = run_offers(&offers_csv(&lines), config(4, 10)).unwrap();

        assert_eq!(report.records.len(), 250);
        assert_eq!(report.rows_read, 250);
        assert_eq!(report.rows_skipped, 0);
        assert_eq!(report.error_count, 0);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_malformed_price_is_dropped_and_reported() {
        let lines = vec![
            offer_line(1, "120"),
            offer_line(1, "not-a-price"),
            offer_line(2, "95"),
        ];
        let report = run_offers(&offers_csv(&lines), config(2, 100)).unwrap();

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].cause.field, "price");
        assert_eq!(report.errors[0].line, Some(3));
    }

    #[test]
    fn test_short_rows_are_skipped_without_errors() {
        let lines = vec![offer_line(1, "120"), "1,2025-08-10,2025-08-17".to_string()];
        let report = run_offers(&offers_csv(&lines), config(1, 100)).unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.rows_skipped, 1);
        assert_eq!(report.error_count, 0);
    }

    #[test]
    fn test_error_channel_drops_overflow_without_failing() {
        let mut lines: Vec<String> = (0..30).map(|_| offer_line(1, "oops")).collect();
        lines.push(offer_line(1, "10"));
        let mut cfg = config(3, 4);
        cfg.error_capacity = 5;
        let report = run_offers(&offers_csv(&lines), cfg).unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.error_count, 30);
        assert_eq!(report.errors.len(), 5);
        assert_eq!(report.dropped_errors, 25);
    }

    #[test]
    fn test_worker_count_does_not_change_result_set() {
        let lines: Vec<String> = (0..1_000)
            .map(|i| {
                if i % 97 == 0 {
                    offer_line(i, "bad")
                } else {
                    offer_line(i, &format!("{}", 100 + i))
                }
            })
            .collect();
        let csv = offers_csv(&lines);

        let single = run_offers(&csv, config(1, 100)).unwrap();
        let many = run_offers(&csv, config(8, 7)).unwrap();

        assert_eq!(single.records.len(), many.records.len());
        assert_eq!(single.error_count, many.error_count);

        let key = |o: &crate::models::Offer| (o.hotel_id, o.price.to_bits());
        let left: HashSet<_> = single.records.iter().map(key).collect();
        let right: HashSet<_> = many.records.iter().map(key).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_empty_source_is_fatal() {
        let result = run_offers("", config(2, 10));
        assert!(matches!(result, Err(IngestError::EmptySource)));
    }

    #[test]
    fn test_unreadable_header_is_fatal() {
        let bytes = b"hotel\xffid;hotelname;hotelstars\n1;Sol;4\n".to_vec();
        let result = Ingestor::new(config(2, 10)).run(csv_reader(bytes.as_slice(), b';'), &HotelParser);
        assert!(matches!(result, Err(IngestError::Header(_))));
    }

    #[test]
    fn test_run_into_hands_over_batches_while_reading() {
        let lines: Vec<String> = (0..500).map(|i| offer_line(i, "10")).collect();
        let csv = offers_csv(&lines);

        let mut batches = 0;
        let mut seen = 0;
        let counts = Ingestor::new(config(2, 50))
            .run_into(csv_reader(csv.as_bytes(), b','), &OfferParser::default(), |batch| {
                batches += 1;
                seen += batch.len();
                true
            })
            .unwrap();

        assert_eq!(seen, 500);
        assert_eq!(counts.records, 500);
        assert_eq!(counts.rows_read, 500);
        assert!(batches >= 10);
    }

    #[test]
    fn test_closed_sink_still_drains_the_source() {
        let lines: Vec<String> = (0..1_000).map(|i| offer_line(i, "10")).collect();
        let csv = offers_csv(&lines);

        let mut calls = 0;
        let counts = Ingestor::new(config(3, 10))
            .run_into(csv_reader(csv.as_bytes(), b','), &OfferParser::default(), |_| {
                calls += 1;
                false
            })
            .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(counts.records, 0);
        assert_eq!(counts.rows_read, 1_000);
    }

    #[test]
    fn test_header_only_source_yields_nothing() {
        let report = run_offers(&offers_csv(&[]), config(2, 10)).unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.rows_read, 0);
    }

    // Serves a prefix of bytes, then fails like a broken disk or socket
    struct FailingSource {
        data: io::Cursor<Vec<u8>>,
    }

    impl Read for FailingSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "source went away"));
            }
            Ok(n)
        }
    }

    #[test]
    fn test_io_failure_mid_stream_is_fatal() {
        let csv = offers_csv(&[offer_line(1, "10"), offer_line(2, "20")]);
        let source = FailingSource {
            data: io::Cursor::new(csv.into_bytes()),
        };
        let result = Ingestor::new(config(2, 1)).run(csv_reader(source, b','), &OfferParser::default());
        assert!(matches!(result, Err(IngestError::Read { .. })));
    }

    #[test]
    fn test_invalid_utf8_row_is_recoverable() {
        let mut bytes = b"hotelid;hotelname;hotelstars\n1;Sol;4\n".to_vec();
        bytes.extend_from_slice(b"2;\xff\xfe;3\n3;Mar;5\n");
        let report = Ingestor::new(config(2, 10))
            .run(csv_reader(bytes.as_slice(), b';'), &HotelParser)
            .unwrap();

        let ids: HashSet<HotelId> = report.records.iter().map(|h| h.id).collect();
        assert_eq!(ids, HashSet::from([HotelId(1), HotelId(3)]));
        assert_eq!(report.error_count, 1);
        assert_eq!(report.errors[0].cause.field, "row");
    }
}
