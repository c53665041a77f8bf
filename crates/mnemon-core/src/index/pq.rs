//! Product quantization
//!
//! Per-subvector codebooks for compressed secondary residency. Training is
//! k-means++ seeding plus a fixed number of Lloyd iterations; codes are one
//! byte per subvector (8-bit) or packed two-per-byte (4-bit). Asymmetric
//! distance keeps the query un-quantized.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::IndexError;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for codebook training
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PqConfig {
    /// Full vector dimensionality; must divide evenly by `num_subvectors`
    pub dimensions: usize,
    /// Number of subvectors each vector is split into
    pub num_subvectors: usize,
    /// Centroids per subvector codebook
    pub num_centroids: usize,
    /// Bits per stored code: 8 (1 byte) or 4 (packed 2/byte)
    pub bits_per_code: u8,
    /// Lloyd iterations after k-means++ seeding
    pub training_iterations: usize,
}

impl Default for PqConfig {
    fn default() -> Self {
        Self {
            dimensions: crate::embeddings::DEFAULT_DIMENSIONS,
            num_subvectors: 8,
            num_centroids: 256,
            bits_per_code: 8,
            training_iterations: 25,
        }
    }
}

// ============================================================================
// CODEBOOK
// ============================================================================

/// A trained product-quantization codebook
///
/// Immutable after training; safe to share across threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqCodebook {
    dimensions: usize,
    num_subvectors: usize,
    num_centroids: usize,
    bits_per_code: u8,
    /// `centroids[sub][centroid]` is a `sub_dim`-length slice
    centroids: Vec<Vec<Vec<f32>>>,
}

impl PqCodebook {
    /// Train a codebook on a sample of vectors
    pub fn train(vectors: &[Vec<f32>], config: &PqConfig) -> Result<Self, IndexError> {
        if vectors.is_empty() {
            return Err(IndexError::InvalidConfig(
                "PQ training requires at least one vector".to_string(),
            ));
        }
        if config.bits_per_code != 4 && config.bits_per_code != 8 {
            return Err(IndexError::InvalidConfig(format!(
                "bits_per_code must be 4 or 8, got {}",
                config.bits_per_code
            )));
        }
        if config.num_subvectors == 0 || config.dimensions % config.num_subvectors != 0 {
            return Err(IndexError::InvalidConfig(format!(
                "dimensions {} not divisible by num_subvectors {}",
                config.dimensions, config.num_subvectors
            )));
        }
        let code_space = 1usize << config.bits_per_code;
        if config.num_centroids == 0 || config.num_centroids > code_space {
            return Err(IndexError::InvalidConfig(format!(
                "num_centroids {} exceeds {}-bit code space",
                config.num_centroids, config.bits_per_code
            )));
        }
        for v in vectors {
            if v.len() != config.dimensions {
                return Err(IndexError::DimensionMismatch(config.dimensions, v.len()));
            }
        }

        // Cannot form more distinct centroids than training points
        let k = config.num_centroids.min(vectors.len());
        let sub_dim = config.dimensions / config.num_subvectors;

        let mut centroids = Vec::with_capacity(config.num_subvectors);
        for sub in 0..config.num_subvectors {
            let offset = sub * sub_dim;
            let points: Vec<&[f32]> = vectors
                .iter()
                .map(|v| &v[offset..offset + sub_dim])
                .collect();
            centroids.push(train_subspace(&points, k, config.training_iterations));
        }

        Ok(Self {
            dimensions: config.dimensions,
            num_subvectors: config.num_subvectors,
            num_centroids: k,
            bits_per_code: config.bits_per_code,
            centroids,
        })
    }

    /// Full vector dimensionality
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of subvectors
    pub fn num_subvectors(&self) -> usize {
        self.num_subvectors
    }

    /// Bits per stored code
    pub fn bits_per_code(&self) -> u8 {
        self.bits_per_code
    }

    /// Size in bytes of one encoded vector
    pub fn code_len(&self) -> usize {
        if self.bits_per_code == 4 {
            self.num_subvectors.div_ceil(2)
        } else {
            self.num_subvectors
        }
    }

    fn sub_dim(&self) -> usize {
        self.dimensions / self.num_subvectors
    }

    fn nearest_centroid(&self, sub: usize, point: &[f32]) -> usize {
        let mut best = 0usize;
        let mut best_dist = f32::INFINITY;
        for (i, c) in self.centroids[sub].iter().enumerate() {
            let d = squared_distance(point, c);
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    }

    /// Encode a vector into packed codes
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>, IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch(self.dimensions, vector.len()));
        }
        let sub_dim = self.sub_dim();
        let codes: Vec<u8> = (0..self.num_subvectors)
            .map(|sub| {
                let offset = sub * sub_dim;
                self.nearest_centroid(sub, &vector[offset..offset + sub_dim]) as u8
            })
            .collect();

        if self.bits_per_code == 4 {
            let mut packed = vec![0u8; self.code_len()];
            for (i, code) in codes.iter().enumerate() {
                if i % 2 == 0 {
                    packed[i / 2] |= code & 0x0F;
                } else {
                    packed[i / 2] |= (code & 0x0F) << 4;
                }
            }
            Ok(packed)
        } else {
            Ok(codes)
        }
    }

    fn unpack(&self, codes: &[u8]) -> Result<Vec<usize>, IndexError> {
        if codes.len() != self.code_len() {
            return Err(IndexError::InvalidConfig(format!(
                "code length {} does not match codebook ({})",
                codes.len(),
                self.code_len()
            )));
        }
        if self.bits_per_code == 4 {
            let mut out = Vec::with_capacity(self.num_subvectors);
            for i in 0..self.num_subvectors {
                let byte = codes[i / 2];
                let code = if i % 2 == 0 { byte & 0x0F } else { byte >> 4 };
                out.push(code as usize);
            }
            Ok(out)
        } else {
            Ok(codes.iter().map(|&c| c as usize).collect())
        }
    }

    /// Decode packed codes back into the concatenated centroids
    pub fn decode(&self, codes: &[u8]) -> Result<Vec<f32>, IndexError> {
        let unpacked = self.unpack(codes)?;
        let mut out = Vec::with_capacity(self.dimensions);
        for (sub, &code) in unpacked.iter().enumerate() {
            let centroid = self.centroids[sub]
                .get(code)
                .ok_or_else(|| IndexError::InvalidConfig(format!("code {code} out of range")))?;
            out.extend_from_slice(centroid);
        }
        Ok(out)
    }

    /// Asymmetric distance: un-quantized query vs stored codes
    ///
    /// `sqrt(Σ ‖query_sub − centroid(code)‖²)` over subvectors.
    pub fn asymmetric_distance(&self, query: &[f32], codes: &[u8]) -> Result<f32, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch(self.dimensions, query.len()));
        }
        let unpacked = self.unpack(codes)?;
        let sub_dim = self.sub_dim();
        let mut total = 0.0f32;
        for (sub, &code) in unpacked.iter().enumerate() {
            let centroid = self.centroids[sub]
                .get(code)
                .ok_or_else(|| IndexError::InvalidConfig(format!("code {code} out of range")))?;
            let offset = sub * sub_dim;
            total += squared_distance(&query[offset..offset + sub_dim], centroid);
        }
        Ok(total.sqrt())
    }

    /// Serialize the codebook for the companion file
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        bincode::serialize(self).map_err(|e| IndexError::Persistence(e.to_string()))
    }

    /// Restore a codebook from companion-file bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        bincode::deserialize(bytes).map_err(|e| IndexError::Persistence(e.to_string()))
    }
}

// ============================================================================
// K-MEANS
// ============================================================================

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// k-means++ seeding followed by fixed-iteration Lloyd refinement
fn train_subspace(points: &[&[f32]], k: usize, iterations: usize) -> Vec<Vec<f32>> {
    let mut rng = rand::thread_rng();
    let sub_dim = points[0].len();

    // k-means++: first centroid uniform, then proportional to D²
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].to_vec());

    while centroids.len() < k {
        let distances: Vec<f32> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| squared_distance(p, c))
                    .fold(f32::INFINITY, f32::min)
            })
            .collect();
        let total: f32 = distances.iter().sum();
        if total <= f32::EPSILON {
            // All remaining points coincide with a centroid
            centroids.push(points[rng.gen_range(0..points.len())].to_vec());
            continue;
        }
        let mut target = rng.gen_range(0.0..total);
        let mut chosen = points.len() - 1;
        for (i, d) in distances.iter().enumerate() {
            if target <= *d {
                chosen = i;
                break;
            }
            target -= d;
        }
        centroids.push(points[chosen].to_vec());
    }

    // Lloyd refinement
    for _ in 0..iterations {
        let mut sums = vec![vec![0.0f32; sub_dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];

        for p in points {
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for (i, c) in centroids.iter().enumerate() {
                let d = squared_distance(p, c);
                if d < best_dist {
                    best_dist = d;
                    best = i;
                }
            }
            counts[best] += 1;
            for (s, x) in sums[best].iter_mut().zip(p.iter()) {
                *s += x;
            }
        }

        for (i, centroid) in centroids.iter_mut().enumerate() {
            // Empty clusters keep their previous centroid
            if counts[i] > 0 {
                for (c, s) in centroid.iter_mut().zip(sums[i].iter()) {
                    *c = s / counts[i] as f32;
                }
            }
        }
    }

    centroids
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_vectors(n: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
            .collect()
    }

    #[test]
    fn test_train_rejects_bad_config() {
        let vectors = sample_vectors(10, 8, 1);
        let bad_split = PqConfig {
            dimensions: 8,
            num_subvectors: 3,
            ..Default::default()
        };
        assert!(PqCodebook::train(&vectors, &bad_split).is_err());

        let bad_bits = PqConfig {
            dimensions: 8,
            num_subvectors: 2,
            bits_per_code: 6,
            ..Default::default()
        };
        assert!(PqCodebook::train(&vectors, &bad_bits).is_err());
    }

    #[test]
    fn test_encode_decode_encode_is_stable() {
        let vectors = sample_vectors(200, 16, 2);
        let config = PqConfig {
            dimensions: 16,
            num_subvectors: 4,
            num_centroids: 16,
            bits_per_code: 8,
            training_iterations: 10,
        };
        let codebook = PqCodebook::train(&vectors, &config).unwrap();

        for v in vectors.iter().take(50) {
            let codes = codebook.encode(v).unwrap();
            let decoded = codebook.decode(&codes).unwrap();
            let recoded = codebook.encode(&decoded).unwrap();
            assert_eq!(codes, recoded);
        }
    }

    #[test]
    fn test_four_bit_packing_roundtrip() {
        let vectors = sample_vectors(100, 8, 3);
        let config = PqConfig {
            dimensions: 8,
            num_subvectors: 4,
            num_centroids: 16,
            bits_per_code: 4,
            training_iterations: 10,
        };
        let codebook = PqCodebook::train(&vectors, &config).unwrap();
        assert_eq!(codebook.code_len(), 2);

        for v in vectors.iter().take(20) {
            let codes = codebook.encode(v).unwrap();
            assert_eq!(codes.len(), 2);
            let decoded = codebook.decode(&codes).unwrap();
            let recoded = codebook.encode(&decoded).unwrap();
            assert_eq!(codes, recoded);
        }
    }

    #[test]
    fn test_asymmetric_distance_matches_decoded() {
        let vectors = sample_vectors(150, 16, 4);
        let config = PqConfig {
            dimensions: 16,
            num_subvectors: 4,
            num_centroids: 32,
            bits_per_code: 8,
            training_iterations: 10,
        };
        let codebook = PqCodebook::train(&vectors, &config).unwrap();

        let query = &vectors[0];
        let codes = codebook.encode(&vectors[1]).unwrap();
        let decoded = codebook.decode(&codes).unwrap();

        let direct = squared_distance(query, &decoded).sqrt();
        let asymmetric = codebook.asymmetric_distance(query, &codes).unwrap();
        assert!((direct - asymmetric).abs() < 1e-4);
    }

    #[test]
    fn test_codebook_serialization() {
        let vectors = sample_vectors(60, 8, 5);
        let config = PqConfig {
            dimensions: 8,
            num_subvectors: 2,
            num_centroids: 16,
            bits_per_code: 8,
            training_iterations: 5,
        };
        let codebook = PqCodebook::train(&vectors, &config).unwrap();
        let bytes = codebook.to_bytes().unwrap();
        let restored = PqCodebook::from_bytes(&bytes).unwrap();

        let codes = codebook.encode(&vectors[0]).unwrap();
        let restored_codes = restored.encode(&vectors[0]).unwrap();
        assert_eq!(codes, restored_codes);
    }
}
