/// NumPy stem dataset (.npy format)
use candle_core::{Device, Tensor};
use ndarray::{Array4, Axis};
use ndarray_npy::ReadNpyExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::SourceDataset;

/// Metadata from dataset.json
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StemMetadata {
    /// Source names, in stem order
    #[serde(default)]
    pub sources: Vec<String>,
    pub samplerate: u32,
    /// Segment duration in seconds
    #[serde(default)]
    pub segment: Option<f64>,
    #[serde(default)]
    pub description: String,
}

/// Stems loaded from a `stems.npy` array `[N, sources, channels, time]`
pub struct NumpyStemDataset {
    stems: Array4<f32>,
    metadata: StemMetadata,
}

impl NumpyStemDataset {
    /// Load from directory containing stems.npy and dataset.json
    pub fn from_directory<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let dir = path.as_ref();

        log::info!("Loading stem dataset from: {:?}", dir);

        let metadata_path = dir.join("dataset.json");
        let metadata: StemMetadata = if metadata_path.exists() {
            let reader = BufReader::new(File::open(&metadata_path)?);
            serde_json::from_reader(reader)?
        } else {
            log::warn!("dataset.json not found, using defaults");
            StemMetadata {
                sources: Vec::new(),
                samplerate: 44_100,
                segment: None,
                description: "Unknown".to_string(),
            }
        };

        let stems = <Array4<f32> as ReadNpyExt>::read_npy(File::open(dir.join("stems.npy"))?)?;

        log::info!("Loaded stems: shape {:?}", stems.shape());

        if !metadata.sources.is_empty() && metadata.sources.len() != stems.shape()[1] {
            return Err(crate::DemixError::Config(format!(
                "dataset.json lists {} sources but stems.npy has {}",
                metadata.sources.len(),
                stems.shape()[1]
            )));
        }

        Ok(Self { stems, metadata })
    }

    pub fn metadata(&self) -> &StemMetadata {
        &self.metadata
    }

    pub fn num_sources(&self) -> usize {
        self.stems.shape()[1]
    }

    pub fn channels(&self) -> usize {
        self.stems.shape()[2]
    }

    /// Samples per example
    pub fn segment_len(&self) -> usize {
        self.stems.shape()[3]
    }
}

impl SourceDataset for NumpyStemDataset {
    fn len(&self) -> usize {
        self.stems.shape()[0]
    }

    fn get(&self, index: usize) -> crate::Result<Tensor> {
        if index >= self.len() {
            return Err(crate::DemixError::Data(format!(
                "index {} out of range for {} examples",
                index,
                self.len()
            )));
        }

        let example = self.stems.index_axis(Axis(0), index);
        let data: Vec<f32> = example.iter().copied().collect();
        let shape = (self.num_sources(), self.channels(), self.segment_len());
        Ok(Tensor::from_vec(data, shape, &Device::Cpu)?)
    }
}
