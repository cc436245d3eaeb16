//! Persisted agent identity (§6): `{data_dir}/agent_id`, `agent_key`, and
//! `agent_key.pub`. Generated once on first run and reused thereafter so an
//! agent's id and keypair survive restarts.

use std::path::Path;

use mm_crypto::{PrivateKey, PublicKey};
use mm_protocol::AgentId;

use crate::error::ConfigError;

pub struct Identity {
    pub agent_id: AgentId,
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

fn io_err(context: &str, e: std::io::Error) -> ConfigError {
    ConfigError::Io(format!("{context}: {e}"))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(&format!("setting permissions on '{}'", path.display()), e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

fn write_new_identity(data_dir: &Path, configured_key: Option<[u8; 32]>) -> Result<Identity, ConfigError> {
    let mut rng = rand::rngs::OsRng;
    let agent_id = AgentId::generate(&mut rng);
    let (private_key, public_key) = match configured_key {
        Some(bytes) => {
            let private_key = PrivateKey::from_bytes(bytes);
            let public_key = private_key.public_key();
            (private_key, public_key)
        }
        None => mm_crypto::generate_keypair(&mut rng),
    };

    let id_path = data_dir.join("agent_id");
    let key_path = data_dir.join("agent_key");
    let pub_path = data_dir.join("agent_key.pub");

    std::fs::write(&id_path, agent_id.to_string())
        .map_err(|e| io_err(&format!("writing '{}'", id_path.display()), e))?;
    std::fs::write(&key_path, hex::encode(private_key.to_bytes()))
        .map_err(|e| io_err(&format!("writing '{}'", key_path.display()), e))?;
    restrict_permissions(&key_path)?;
    std::fs::write(&pub_path, hex::encode(public_key.to_bytes()))
        .map_err(|e| io_err(&format!("writing '{}'", pub_path.display()), e))?;

    Ok(Identity {
        agent_id,
        private_key,
        public_key,
    })
}

fn read_existing_identity(data_dir: &Path) -> Result<Identity, ConfigError> {
    let id_path = data_dir.join("agent_id");
    let key_path = data_dir.join("agent_key");

    let id_text = std::fs::read_to_string(&id_path)
        .map_err(|e| io_err(&format!("reading '{}'", id_path.display()), e))?;
    let agent_id = id_text
        .trim()
        .parse::<AgentId>()
        .map_err(|_| ConfigError::InvalidValue(format!("'{}' does not contain a valid agent id", id_path.display())))?;

    let key_text = std::fs::read_to_string(&key_path)
        .map_err(|e| io_err(&format!("reading '{}'", key_path.display()), e))?;
    let key_bytes: [u8; 32] = hex::decode(key_text.trim())
        .map_err(|e| ConfigError::InvalidValue(format!("'{}' is not valid hex: {e}", key_path.display())))?
        .try_into()
        .map_err(|_| ConfigError::InvalidValue(format!("'{}' must contain 32 bytes", key_path.display())))?;

    let private_key = PrivateKey::from_bytes(key_bytes);
    let public_key = private_key.public_key();

    Ok(Identity {
        agent_id,
        private_key,
        public_key,
    })
}

/// Load the identity persisted under `data_dir`, creating it (and the
/// directory) on first run. `configured_key` is `agent.private_key` from
/// the config file, used only when no `agent_key` file exists yet.
pub fn load_or_create(data_dir: &Path, configured_key: Option<[u8; 32]>) -> Result<Identity, ConfigError> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| io_err(&format!("creating data dir '{}'", data_dir.display()), e))?;

    let id_path = data_dir.join("agent_id");
    let key_path = data_dir.join("agent_key");
    if id_path.exists() && key_path.exists() {
        read_existing_identity(data_dir)
    } else {
        write_new_identity(data_dir, configured_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_creates_and_persists_identity() {
        let dir = tempfile::tempdir().unwrap();
        let identity = load_or_create(dir.path(), None).unwrap();
        assert!(dir.path().join("agent_id").exists());
        assert!(dir.path().join("agent_key").exists());
        assert!(dir.path().join("agent_key.pub").exists());
        assert_eq!(identity.public_key, identity.private_key.public_key());
    }

    #[test]
    fn second_run_reuses_persisted_identity() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create(dir.path(), None).unwrap();
        let second = load_or_create(dir.path(), None).unwrap();
        assert_eq!(first.agent_id, second.agent_id);
        assert_eq!(first.public_key, second.public_key);
    }

    #[test]
    fn configured_private_key_is_honored_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let key = [7u8; 32];
        let identity = load_or_create(dir.path(), Some(key)).unwrap();
        assert_eq!(identity.private_key.to_bytes(), key);
    }

    #[cfg(unix)]
    #[test]
    fn private_key_file_is_not_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        load_or_create(dir.path(), None).unwrap();
        let meta = std::fs::metadata(dir.path().join("agent_key")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
