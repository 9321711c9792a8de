// File-based entry points into the ingestion pipeline

use crate::ingest::{csv_reader, IngestConfig, IngestError, IngestReport, Ingestor};
use crate::models::{Hotel, Offer};
use crate::record::{HotelParser, OfferParser};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;

pub const HOTELS_DELIMITER: u8 = b';';
pub const OFFERS_DELIMITER: u8 = b',';

const READ_BUFFER_BYTES: usize = 1024 * 1024;

pub struct DataImporter {
    hotels_path: PathBuf,
    offers_path: PathBuf,
    ingestor: Ingestor,
}

impl DataImporter {
    pub fn new(hotels_path: impl Into<PathBuf>, offers_path: impl Into<PathBuf>) -> Self {
        Self::with_config(hotels_path, offers_path, IngestConfig::default())
    }

    pub fn with_config(
        hotels_path: impl Into<PathBuf>,
        offers_path: impl Into<PathBuf>,
        config: IngestConfig,
    ) -> Self {
        Self {
            hotels_path: hotels_path.into(),
            offers_path: offers_path.into(),
            ingestor: Ingestor::new(config),
        }
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn offers_path(&self) -> &Path {
        &self.offers_path
    }

    pub fn load_hotels(&self) -> Result<IngestReport<Hotel>, IngestError> {
        info!(path = %self.hotels_path.display(), "loading hotels");
        let reader = csv_reader(open(&self.hotels_path)?, HOTELS_DELIMITER);
        self.ingestor.run(reader, &HotelParser)
    }

    pub fn load_offers(&self) -> Result<IngestReport<Offer>, IngestError> {
        info!(path = %self.offers_path.display(), "loading offers");
        let reader = csv_reader(open(&self.offers_path)?, OFFERS_DELIMITER);
        self.ingestor.run(reader, &OfferParser::default())
    }
}

pub(crate) fn open(path: &Path) -> Result<BufReader<File>, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::with_capacity(READ_BUFFER_BYTES, file))
}
