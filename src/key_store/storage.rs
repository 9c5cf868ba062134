use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::KeyStoreConfig;
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::key_store::{KeyPair, MasterKey, StoredKeyInfo};
use crate::secure_memory::SecureBytes;
use crate::utils;

const RECORD_FORMAT_VERSION: u8 = 1;
const AT_REST_ALGORITHM: &str = "chacha20poly1305";
const RECORD_SUFFIX: &str = ".keypair.json";
const BACKUP_SUFFIX: &str = ".keypair.json.bak";
const TEMP_MARKER: &str = ".tmp-";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// On-disk record for one principal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredKeyRecord {
    format_version: u8,
    owner_id: String,
    /// At-rest AEAD protecting `ciphertext`
    algorithm: String,
    public_key: String,
    nonce: String,
    ciphertext: String,
    auth_tag: String,
    created_at: DateTime<Utc>,
    generation: u32,
}

impl StoredKeyRecord {
    fn info(&self) -> StoredKeyInfo {
        StoredKeyInfo {
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
            generation: self.generation,
        }
    }
}

/// Points at which a rotation can be interrupted.
#[cfg_attr(not(test), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RotationStage {
    TempWritten,
    BackedUp,
    Renamed,
}

/// The key store manager for securely storing principal key pairs
pub struct KeyStore {
    root: PathBuf,
    master_key: MasterKey,
    clock: Arc<dyn Clock>,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyStore {
    /// Open the store described by `config`, creating the directory if
    /// needed and repairing leftovers of interrupted writes.
    pub fn open(config: &KeyStoreConfig, clock: Arc<dyn Clock>) -> CryptoResult<Self> {
        let master_key = MasterKey::from_config(config.master_key.as_deref())?;
        Self::with_master_key(&config.directory, master_key, clock)
    }

    pub fn with_master_key<P: AsRef<Path>>(
        directory: P,
        master_key: MasterKey,
        clock: Arc<dyn Clock>,
    ) -> CryptoResult<Self> {
        let root = directory.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        restrict_permissions(&root, 0o700)?;

        let store = Self {
            root,
            master_key,
            clock,
            write_locks: Mutex::new(HashMap::new()),
        };
        store.recover()?;
        Ok(store)
    }

    pub fn is_master_key_ephemeral(&self) -> bool {
        self.master_key.is_ephemeral()
    }

    pub fn directory(&self) -> &Path {
        &self.root
    }

    /// Store a key pair, replacing any existing one.
    pub fn put(&self, owner_id: &str, public_key_pem: &str, private_key: &SecureBytes) -> CryptoResult<StoredKeyInfo> {
        utils::validate_owner_id(owner_id)?;
        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let generation = match self.read_record(owner_id)? {
            Some(existing) => existing.generation + 1,
            None => 1,
        };
        let record = self.seal(owner_id, public_key_pem, private_key, generation)?;
        let temp = self.write_temp(owner_id, &record)?;
        fs::rename(&temp, self.record_path(owner_id))?;
        sync_dir(&self.root);

        Ok(record.info())
    }

    /// Load and decrypt a key pair.
    ///
    /// A missing record is `Ok(None)`. A record that fails authentication is
    /// an `IntegrityFailure`, never "no key".
    pub fn get(&self, owner_id: &str) -> CryptoResult<Option<KeyPair>> {
        utils::validate_owner_id(owner_id)?;
        let record = match self.read_record(owner_id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        let private_key = self.open_record(owner_id, &record)?;

        Ok(Some(KeyPair {
            owner_id: owner_id.to_string(),
            public_key_pem: record.public_key,
            private_key,
        }))
    }

    /// The clear half of a record, without decrypting anything.
    pub fn public_key(&self, owner_id: &str) -> CryptoResult<Option<String>> {
        utils::validate_owner_id(owner_id)?;
        Ok(self.read_record(owner_id)?.map(|record| record.public_key))
    }

    pub fn info(&self, owner_id: &str) -> CryptoResult<Option<StoredKeyInfo>> {
        utils::validate_owner_id(owner_id)?;
        Ok(self.read_record(owner_id)?.map(|record| record.info()))
    }

    /// Metadata of every stored key pair. Unreadable records are logged and
    /// skipped.
    pub fn list(&self) -> CryptoResult<Vec<StoredKeyInfo>> {
        let mut result = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let owner_id = match owner_from_record_path(&path) {
                Some(owner_id) => owner_id,
                None => continue,
            };
            match self.read_record(&owner_id) {
                Ok(Some(record)) => result.push(record.info()),
                Ok(None) => {}
                Err(e) => log::error!("skipping unreadable key record for '{}': {}", owner_id, e),
            }
        }
        result.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));
        Ok(result)
    }

    /// Replace an existing key pair so that a crash at any point leaves
    /// either the old or the new pair fully readable.
    pub fn rotate(&self, owner_id: &str, public_key_pem: &str, private_key: &SecureBytes) -> CryptoResult<StoredKeyInfo> {
        self.rotate_until(owner_id, public_key_pem, private_key, None)
    }

    pub(crate) fn rotate_until(
        &self,
        owner_id: &str,
        public_key_pem: &str,
        private_key: &SecureBytes,
        halt_after: Option<RotationStage>,
    ) -> CryptoResult<StoredKeyInfo> {
        utils::validate_owner_id(owner_id)?;
        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let existing = self
            .read_record(owner_id)?
            .ok_or_else(|| CryptoError::not_found("key pair", owner_id, error_codes::KEY_NOT_FOUND))?;

        let record = self.seal(owner_id, public_key_pem, private_key, existing.generation + 1)?;
        let record_path = self.record_path(owner_id);
        let backup_path = self.backup_path(owner_id);

        // 1. new material goes to a temporary file
        let temp = self.write_temp(owner_id, &record)?;
        if halt_after == Some(RotationStage::TempWritten) {
            return Ok(record.info());
        }

        // 2. back up the current material
        fs::copy(&record_path, &backup_path)?;
        File::open(&backup_path)?.sync_all()?;
        if halt_after == Some(RotationStage::BackedUp) {
            return Ok(record.info());
        }

        // 3. atomic swap
        fs::rename(&temp, &record_path)?;
        sync_dir(&self.root);
        if halt_after == Some(RotationStage::Renamed) {
            return Ok(record.info());
        }

        // 4. clean up
        fs::remove_file(&backup_path)?;
        log::info!("rotated key pair for '{}' to generation {}", owner_id, record.generation);

        Ok(record.info())
    }

    /// Remove a principal's key pair. Returns false when there was none.
    pub fn delete(&self, owner_id: &str) -> CryptoResult<bool> {
        utils::validate_owner_id(owner_id)?;
        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut removed = false;
        for path in [self.record_path(owner_id), self.backup_path(owner_id)] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(owner_id.to_string()).or_default())
    }

    /// Fixed-length name for an owner's files, whatever the id length.
    fn file_stem(owner_id: &str) -> String {
        utils::sha256_hex(owner_id.as_bytes())
    }

    fn record_path(&self, owner_id: &str) -> PathBuf {
        self.root.join(format!("{}{}", Self::file_stem(owner_id), RECORD_SUFFIX))
    }

    fn backup_path(&self, owner_id: &str) -> PathBuf {
        self.root.join(format!("{}{}", Self::file_stem(owner_id), BACKUP_SUFFIX))
    }

    fn read_record(&self, owner_id: &str) -> CryptoResult<Option<StoredKeyRecord>> {
        let contents = match fs::read(self.record_path(owner_id)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: StoredKeyRecord = serde_json::from_slice(&contents).map_err(|e| {
            log::error!("key record for '{}' is corrupt: {}", owner_id, e);
            CryptoError::integrity_failure("key_store.read", "stored key record is corrupt", error_codes::STORED_KEY_CORRUPT)
        })?;

        if record.owner_id != owner_id || record.format_version != RECORD_FORMAT_VERSION {
            log::error!("key record for '{}' does not match its location or format", owner_id);
            return Err(CryptoError::integrity_failure(
                "key_store.read",
                "stored key record does not belong to this owner",
                error_codes::STORED_KEY_CORRUPT,
            ));
        }
        Ok(Some(record))
    }

    fn cipher(&self) -> CryptoResult<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(self.master_key.as_bytes()).map_err(|_| {
            CryptoError::key_management_error("master_key", "invalid master key length", "-")
        })
    }

    fn seal(
        &self,
        owner_id: &str,
        public_key_pem: &str,
        private_key: &SecureBytes,
        generation: u32,
    ) -> CryptoResult<StoredKeyRecord> {
        if public_key_pem.trim().is_empty() || private_key.is_empty() {
            return Err(CryptoError::invalid_input(
                "key_pair",
                "public and private key material must not be empty",
                error_codes::EMPTY_PAYLOAD,
            ));
        }

        let cipher = self.cipher()?;
        let nonce_bytes = utils::random_bytes(NONCE_LEN)?;
        let mut buffer = private_key.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce_bytes), owner_id.as_bytes(), &mut buffer)
            .map_err(|e| CryptoError::key_management_error("seal", &e.to_string(), owner_id))?;

        Ok(StoredKeyRecord {
            format_version: RECORD_FORMAT_VERSION,
            owner_id: owner_id.to_string(),
            algorithm: AT_REST_ALGORITHM.to_string(),
            public_key: public_key_pem.to_string(),
            nonce: base64::encode(&nonce_bytes),
            ciphertext: base64::encode(&buffer),
            auth_tag: base64::encode(tag.as_slice()),
            created_at: self.clock.now(),
            generation,
        })
    }

    fn open_record(&self, owner_id: &str, record: &StoredKeyRecord) -> CryptoResult<SecureBytes> {
        let corrupt = |cause: &str| {
            log::error!("stored private key for '{}' failed verification: {}", owner_id, cause);
            CryptoError::integrity_failure("key_store.get", cause, error_codes::AEAD_TAG_MISMATCH)
        };

        if record.algorithm != AT_REST_ALGORITHM {
            return Err(corrupt("unknown at-rest algorithm"));
        }
        let nonce = base64::decode(&record.nonce).map_err(|_| corrupt("nonce is not base64"))?;
        let tag = base64::decode(&record.auth_tag).map_err(|_| corrupt("tag is not base64"))?;
        let mut buffer = base64::decode(&record.ciphertext).map_err(|_| corrupt("ciphertext is not base64"))?;
        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(corrupt("nonce or tag has the wrong length"));
        }

        self.cipher()?
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                owner_id.as_bytes(),
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| {
                utils::secure_zero(&mut buffer);
                corrupt("authentication tag mismatch (tampered record or wrong master key)")
            })?;

        Ok(SecureBytes::from(buffer))
    }

    fn write_temp(&self, owner_id: &str, record: &StoredKeyRecord) -> CryptoResult<PathBuf> {
        let serialized = serde_json::to_vec_pretty(record)?;
        let temp = self.root.join(format!(
            "{}{}{}",
            Self::file_stem(owner_id),
            TEMP_MARKER,
            uuid::Uuid::new_v4().simple()
        ));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&temp)?;
        file.write_all(&serialized)?;
        file.sync_all()?;
        Ok(temp)
    }

    /// Remove temporaries that never got renamed into place and restore
    /// backups whose primary record is missing.
    fn recover(&self) -> CryptoResult<()> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            if name.contains(TEMP_MARKER) {
                log::warn!("removing incomplete key write {}", name);
                fs::remove_file(&path)?;
            } else if let Some(stem) = name.strip_suffix(BACKUP_SUFFIX) {
                let primary = self.root.join(format!("{}{}", stem, RECORD_SUFFIX));
                if primary.exists() {
                    fs::remove_file(&path)?;
                } else {
                    log::warn!("restoring key record from backup {}", name);
                    fs::rename(&path, &primary)?;
                }
            }
        }
        Ok(())
    }
}

/// Owner named inside a record file. The file name only carries a digest,
/// so the id is read from the record and checked against that digest.
fn owner_from_record_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(RECORD_SUFFIX)?;
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::error!("skipping unreadable key record {}: {}", name, e);
            return None;
        }
    };
    let record: StoredKeyRecord = match serde_json::from_slice(&contents) {
        Ok(record) => record,
        Err(e) => {
            log::error!("skipping corrupt key record {}: {}", name, e);
            return None;
        }
    };
    if KeyStore::file_stem(&record.owner_id) != stem {
        log::error!("key record {} names an owner that does not match its location", name);
        return None;
    }
    Some(record.owner_id)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> CryptoResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> CryptoResult<()> {
    Ok(())
}

fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}
