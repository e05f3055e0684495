use crate::codec::{self, EncodedProfile};
use crate::config::PROFILE_STORE_PREFIX;
use crate::embedding::{MAX_ENROLLED, MIN_ENROLLED};
use crate::identity::validate_subject;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const PROFILE_FILE: &str = "profile.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    pub subject: String,
    pub profile: EncodedProfile,
    pub samples: usize,
    /// Enrolled with fewer samples than poses.
    pub degraded: bool,
}

impl ProfileRecord {
    /// Checks the profile decodes and holds enough samples to be persisted.
    pub fn new(subject: &str, profile: EncodedProfile) -> Result<Self> {
        validate_subject(subject)?;
        let samples = persistable_samples(subject, &profile)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject: subject.to_string(),
            samples,
            degraded: samples < MAX_ENROLLED,
            profile,
        })
    }

    /// The stored counts must agree with what the profile actually decodes to.
    fn verify(&self) -> Result<()> {
        let samples = persistable_samples(&self.subject, &self.profile)?;
        if self.samples != samples || self.degraded != (samples < MAX_ENROLLED) {
            anyhow::bail!(
                "record for {} claims {} samples (degraded: {}) but its profile holds {}",
                self.subject,
                self.samples,
                self.degraded,
                samples
            );
        }
        Ok(())
    }
}

fn persistable_samples(subject: &str, profile: &EncodedProfile) -> Result<usize> {
    let set = codec::decode(profile).context("validating enrolled profile")?;
    if !set.is_persistable() {
        anyhow::bail!(
            "refusing to store {} samples for {}; between {} and {} are required",
            set.len(),
            subject,
            MIN_ENROLLED,
            MAX_ENROLLED
        );
    }
    Ok(set.len())
}

/// One profile per subject, under `<root>/<subject>/profile.bin`.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new(*PROFILE_STORE_PREFIX)
    }
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn subject_dir(&self, subject: &str) -> Result<PathBuf> {
        validate_subject(subject)?;
        Ok(self.root.join(subject))
    }

    pub fn load(&self, subject: &str) -> Result<Option<ProfileRecord>> {
        let file = self.subject_dir(subject)?.join(PROFILE_FILE);

        if !file.exists() {
            return Ok(None);
        }

        let data = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
        let record: ProfileRecord = postcard::from_bytes(&data)
            .with_context(|| format!("decoding {}", file.display()))?;
        record
            .verify()
            .with_context(|| format!("checking {}", file.display()))?;
        Ok(Some(record))
    }

    /// Replaces any profile already stored for the record's subject.
    pub fn save(&self, record: &ProfileRecord) -> Result<PathBuf> {
        record.verify()?;
        let dir = self.subject_dir(&record.subject)?;
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let file = dir.join(PROFILE_FILE);
        let data = postcard::to_allocvec(record)?;
        std::fs::write(&file, data).with_context(|| format!("writing {}", file.display()))?;
        Ok(file)
    }

    /// Returns whether anything was removed.
    pub fn purge(&self, subject: &str) -> Result<bool> {
        let path = self.subject_dir(subject)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&path).with_context(|| format!("removing {}", path.display()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{embedding_with, EnrollmentSet};

    fn profile(samples: usize) -> EncodedProfile {
        let set = EnrollmentSet::new((0..samples).map(|i| embedding_with(i as f64)).collect())
            .unwrap();
        codec::encode(&set)
    }

    #[test]
    fn save_load_purge() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        assert_eq!(store.load("1234567890").unwrap(), None);

        let record = ProfileRecord::new("1234567890", profile(7)).unwrap();
        assert!(!record.degraded);
        let path = store.save(&record).unwrap();
        assert!(path.ends_with("1234567890/profile.bin"));
        assert_eq!(store.load("1234567890").unwrap(), Some(record));

        assert!(store.purge("1234567890").unwrap());
        assert!(!store.purge("1234567890").unwrap());
        assert_eq!(store.load("1234567890").unwrap(), None);
    }

    #[test]
    fn save_replaces_previous_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        store
            .save(&ProfileRecord::new("alice", profile(7)).unwrap())
            .unwrap();
        let second = ProfileRecord::new("alice", profile(5)).unwrap();
        store.save(&second).unwrap();

        let loaded = store.load("alice").unwrap().unwrap();
        assert_eq!(loaded.samples, 5);
        assert!(loaded.degraded);
        assert_eq!(codec::decode(&loaded.profile).unwrap().len(), 5);
    }

    #[test]
    fn short_profiles_are_refused() {
        assert!(ProfileRecord::new("alice", profile(4)).is_err());

        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        let mut record = ProfileRecord::new("alice", profile(5)).unwrap();
        record.samples = 4;
        assert!(store.save(&record).is_err());
        assert_eq!(store.load("alice").unwrap(), None);
    }

    #[test]
    fn inflated_sample_count_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        let mut record = ProfileRecord::new("alice", profile(5)).unwrap();
        record.samples = 7;
        record.degraded = false;
        assert!(store.save(&record).is_err());
        assert_eq!(store.load("alice").unwrap(), None);
    }

    #[test]
    fn tampered_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        let path = store
            .save(&ProfileRecord::new("alice", profile(7)).unwrap())
            .unwrap();

        let mut forged = ProfileRecord::new("alice", profile(5)).unwrap();
        forged.samples = 7;
        forged.degraded = false;
        std::fs::write(&path, postcard::to_allocvec(&forged).unwrap()).unwrap();

        let err = store.load("alice").unwrap_err();
        assert!(format!("{err:#}").contains("claims 7 samples"));
    }

    #[test]
    fn malformed_profile_is_refused() {
        let err = ProfileRecord::new("alice", EncodedProfile::from("AAAA".to_string()));
        assert!(err.is_err());
    }

    #[test]
    fn subject_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(store.load("../etc").is_err());
        assert!(store.purge("").is_err());
    }
}
