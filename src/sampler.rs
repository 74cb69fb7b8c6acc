//! Peer profile sampling.
//!
//! Draws per-peer network profiles from a categorical mixture of three access
//! technologies, each with four independent truncated-to-positive normal
//! distributions (upload, download, latency, loss). The mixture shares and
//! distribution parameters come from the 2019 fixed-broadband measurement
//! campaign the testbed models.
//!
//! The generator is seeded so a run can be reproduced exactly.

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{Result, TestbedError};
use crate::topology::{Peer, ORIGIN};

/// Upper bound on rejection-sampling attempts per drawn quantity.
const MAX_DRAW_ATTEMPTS: u32 = 4096;

/// Mixture shares in percent; they sum to 100.0.
const ADSL_SHARE: f64 = 77.30;
const CABLE_SHARE: f64 = 19.70;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technology {
    Adsl,
    Cable,
    Fttc,
}

impl Technology {
    /// Selects a technology from a uniform roll in [0, 100).
    pub fn from_roll(roll: f64) -> Self {
        if roll < ADSL_SHARE {
            Technology::Adsl
        } else if roll < ADSL_SHARE + CABLE_SHARE {
            Technology::Cable
        } else {
            Technology::Fttc
        }
    }

    fn name(self) -> &'static str {
        match self {
            Technology::Adsl => "ADSL",
            Technology::Cable => "Cable",
            Technology::Fttc => "FTTC",
        }
    }

    /// (mean, standard deviation) per quantity. Upload and download are in
    /// Mbit/s, latency in ms, loss as a fraction.
    fn upload_params(self) -> (f64, f64) {
        match self {
            Technology::Adsl => (0.8241263021582734, 0.21124587974728493),
            Technology::Cable => (18.612462057142857, 11.386316445471635),
            Technology::Fttc => (13.7526504, 5.233485819565032),
        }
    }

    fn download_params(self) -> (f64, f64) {
        match self {
            Technology::Adsl => (9.489131670827337, 5.811595717123024),
            Technology::Cable => (211.760197609, 106.11755346760694),
            Technology::Fttc => (52.611914328, 17.76856566435048),
        }
    }

    fn latency_params(self) -> (f64, f64) {
        match self {
            Technology::Adsl => (25.5033015573741, 9.71303335021941),
            Technology::Cable => (17.643558222285716, 2.341692489398925),
            Technology::Fttc => (12.959799725, 5.467801480564891),
        }
    }

    fn loss_params(self) -> (f64, f64) {
        match self {
            Technology::Adsl => (0.001967985611510791, 0.0047487657799690644),
            Technology::Cable => (0.0026428571428571425, 0.010508706830750317),
            Technology::Fttc => (0.0005, 0.0007378647873726219),
        }
    }
}

/// Converts a sampled Mbit/s rate to integer Kbit/s, rounding half away
/// from zero.
pub fn mbit_to_kbit(mbit: f64) -> u32 {
    (mbit * 1000.0).round() as u32
}

/// Seeded profile generator.
pub struct Sampler {
    rng: ChaCha8Rng,
}

impl Sampler {
    pub fn new(seed: u64) -> Self {
        Sampler {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draws `count` peer profiles named `"1"..=count`.
    pub fn sample_peers(&mut self, count: usize) -> Result<Vec<Peer>> {
        let mut peers = Vec::with_capacity(count);
        for index in 1..=count {
            let roll: f64 = self.rng.gen_range(0.0..100.0);
            let technology = Technology::from_roll(roll);
            let peer = self.sample_peer(index.to_string(), technology)?;
            debug!(
                "peer {} ({}): up {} Kbit/s, down {} Kbit/s, latency {:.2} ms, loss {:.4}",
                peer.name,
                technology.name(),
                peer.max_upload,
                peer.max_download,
                peer.latency,
                peer.loss
            );
            peers.push(peer);
        }
        info!("sampled {} peer profiles", peers.len());
        Ok(peers)
    }

    /// Draws the origin profile from its dedicated uniform ranges.
    pub fn sample_origin(&mut self) -> Peer {
        Peer {
            name: ORIGIN.to_string(),
            max_upload: self.rng.gen_range(25000..=30000),
            max_download: self.rng.gen_range(78000..=80000),
            latency: 40.20,
            loss: 0.0024,
        }
    }

    fn sample_peer(&mut self, name: String, technology: Technology) -> Result<Peer> {
        let max_upload = self.draw_rate_kbit(technology, "upload", technology.upload_params())?;
        let max_download =
            self.draw_rate_kbit(technology, "download", technology.download_params())?;
        let latency = self.draw_positive(technology, "latency", technology.latency_params())?;
        let loss = self.draw_positive(technology, "loss", technology.loss_params())?;
        Ok(Peer {
            name,
            max_upload,
            max_download,
            latency,
            loss,
        })
    }

    /// Rejection-samples a rate until it is positive after Kbit conversion.
    fn draw_rate_kbit(
        &mut self,
        technology: Technology,
        quantity: &'static str,
        (mean, std_dev): (f64, f64),
    ) -> Result<u32> {
        let normal = Normal::new(mean, std_dev)
            .map_err(|e| TestbedError::Config(format!("bad normal parameters: {e}")))?;
        for _ in 0..MAX_DRAW_ATTEMPTS {
            let sample = normal.sample(&mut self.rng);
            if sample >= 0.0 {
                let kbit = mbit_to_kbit(sample);
                if kbit > 0 {
                    return Ok(kbit);
                }
            }
        }
        Err(TestbedError::SamplerUnsatisfiable {
            technology: technology.name(),
            quantity,
            attempts: MAX_DRAW_ATTEMPTS,
        })
    }

    /// Rejection-samples until the draw is non-negative.
    fn draw_positive(
        &mut self,
        technology: Technology,
        quantity: &'static str,
        (mean, std_dev): (f64, f64),
    ) -> Result<f64> {
        let normal = Normal::new(mean, std_dev)
            .map_err(|e| TestbedError::Config(format!("bad normal parameters: {e}")))?;
        for _ in 0..MAX_DRAW_ATTEMPTS {
            let sample = normal.sample(&mut self.rng);
            if sample >= 0.0 {
                return Ok(sample);
            }
        }
        Err(TestbedError::SamplerUnsatisfiable {
            technology: technology.name(),
            quantity,
            attempts: MAX_DRAW_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technology_selection_covers_the_mixture() {
        assert_eq!(Technology::from_roll(0.0), Technology::Adsl);
        assert_eq!(Technology::from_roll(77.29), Technology::Adsl);
        assert_eq!(Technology::from_roll(77.30), Technology::Cable);
        assert_eq!(Technology::from_roll(96.99), Technology::Cable);
        assert_eq!(Technology::from_roll(97.0), Technology::Fttc);
        assert_eq!(Technology::from_roll(99.999), Technology::Fttc);
    }

    #[test]
    fn kbit_conversion_rounds_half_away_from_zero() {
        assert_eq!(mbit_to_kbit(0.8245), 825);
        assert_eq!(mbit_to_kbit(0.8244), 824);
        assert_eq!(mbit_to_kbit(9.4895), 9490);
        assert_eq!(mbit_to_kbit(0.0004), 0);
    }

    #[test]
    fn sampled_peers_satisfy_profile_invariants() {
        let mut sampler = Sampler::new(7);
        let peers = sampler.sample_peers(50).unwrap();
        assert_eq!(peers.len(), 50);
        for (i, peer) in peers.iter().enumerate() {
            assert_eq!(peer.name, (i + 1).to_string());
            assert!(peer.max_upload > 0);
            assert!(peer.max_download > 0);
            assert!(peer.latency >= 0.0);
            assert!(peer.loss >= 0.0);
        }
    }

    #[test]
    fn sampling_is_reproducible_for_a_seed() {
        let a = Sampler::new(42).sample_peers(10).unwrap();
        let b = Sampler::new(42).sample_peers(10).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn origin_profile_stays_in_its_ranges() {
        let mut sampler = Sampler::new(3);
        for _ in 0..20 {
            let origin = sampler.sample_origin();
            assert_eq!(origin.name, ORIGIN);
            assert!((25000..=30000).contains(&origin.max_upload));
            assert!((78000..=80000).contains(&origin.max_download));
            assert_eq!(origin.latency, 40.20);
            assert_eq!(origin.loss, 0.0024);
        }
    }
}
