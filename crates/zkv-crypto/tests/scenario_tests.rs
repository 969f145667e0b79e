//! End-to-end flows: registration, login, project metadata and large files,
//! with the server side simulated by serializing records to JSON and back.

use secrecy::SecretString;
use serde_json::json;
use zkv_crypto::identity::IdentityKeyPair;
use zkv_crypto::{
    decrypt, decrypt_file, derive_master_key, encrypt, encrypt_file, generate_resource_key,
    unwrap_key, wrap_key, ChunkMode, ChunkOptions, CryptoError, KdfParams, KeyManager,
    SessionConfig, SessionState, SymmetricKey, UserRecord,
};

const EMAIL: &str = "alice@example.com";

fn fast_config() -> SessionConfig {
    SessionConfig {
        kdf: KdfParams::with_iterations(1_000),
        ..SessionConfig::default()
    }
}

/// Store and retrieve a record unchanged, the way an opaque server would.
fn server_roundtrip<T: serde::Serialize + serde::de::DeserializeOwned>(value: &T) -> T {
    let wire = serde_json::to_string(value).unwrap();
    serde_json::from_str(&wire).unwrap()
}

fn registered() -> UserRecord {
    let mut km = KeyManager::new(fast_config());
    let record = km
        .register(EMAIL, &SecretString::from("correcthorse1"))
        .unwrap();
    km.logout();
    server_roundtrip(&record)
}

#[test]
fn register_then_login_with_correct_password() {
    let stored = registered();
    assert_eq!(stored.salt.len(), 32);

    // unwrap directly with the re-derived master key
    let salt: [u8; 32] = stored.salt.as_slice().try_into().unwrap();
    let master =
        derive_master_key(&SecretString::from("correcthorse1"), &salt, &stored.kdf).unwrap();
    let identity = IdentityKeyPair::unwrap_private_key(&stored.wrapped_private_key, &master)
        .expect("correct password must unwrap the identity key");
    assert!(identity.matches_public_key(&stored.public_key));

    // and through a fresh session
    let mut km = KeyManager::new(fast_config());
    km.login(EMAIL, &SecretString::from("correcthorse1"), &stored)
        .unwrap();
    assert_eq!(km.state(), SessionState::Authenticated);
    assert_eq!(km.public_key(), Some(stored.public_key.as_slice()));
}

#[test]
fn login_with_wrong_password_fails_authentication() {
    let stored = registered();

    let salt: [u8; 32] = stored.salt.as_slice().try_into().unwrap();
    let master =
        derive_master_key(&SecretString::from("wrongpassword"), &salt, &stored.kdf).unwrap();
    let result = IdentityKeyPair::unwrap_private_key(&stored.wrapped_private_key, &master);
    assert!(matches!(result, Err(CryptoError::Authentication)));

    let mut km = KeyManager::new(fast_config());
    let err = km
        .login(EMAIL, &SecretString::from("wrongpassword"), &stored)
        .unwrap_err();
    assert!(matches!(err, CryptoError::InvalidCredentials));
    assert!(err.is_authentication());
    assert_eq!(km.state(), SessionState::Anonymous);
    assert!(km.public_key().is_none());
}

#[test]
fn project_metadata_survives_server_roundtrip() {
    let master_a = zkv_crypto::MasterKey::from_bytes([11u8; 32]);
    let project_key = generate_resource_key();

    let metadata = encrypt(&project_key, &json!({"name": "Proj1"})).unwrap();
    let wrapped = wrap_key(&project_key, &master_a).unwrap();

    let (metadata, wrapped) = server_roundtrip(&(metadata, wrapped));

    let unwrapped = unwrap_key(&wrapped, &master_a).unwrap();
    assert_eq!(unwrapped.as_bytes(), project_key.as_bytes());
    let recovered: serde_json::Value = decrypt(&unwrapped, &metadata).unwrap();
    assert_eq!(recovered, json!({"name": "Proj1"}));
    assert_eq!(recovered.to_string(), r#"{"name":"Proj1"}"#);
}

#[tokio::test]
async fn project_metadata_through_sessions() {
    let stored = registered();

    let mut km = KeyManager::new(fast_config());
    km.login(EMAIL, &SecretString::from("correcthorse1"), &stored)
        .unwrap();
    let project = server_roundtrip(&km.create_project("Proj1").unwrap());
    km.logout();

    let mut km = KeyManager::new(fast_config());
    km.login(EMAIL, &SecretString::from("correcthorse1"), &stored)
        .unwrap();
    let metadata = km.open_project(&project).await.unwrap();

    assert_eq!(metadata.name, "Proj1");
    assert_eq!(metadata.owner, EMAIL);
    assert!(project.project_id.starts_with("proj_"));
}

#[test]
fn large_file_chunks_and_reverse_order() {
    let key = generate_resource_key();
    let size = 2_621_440; // 2.5 MiB
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

    let mut file = encrypt_file(
        &key,
        &data,
        "big.bin",
        "application/octet-stream",
        &ChunkOptions::default(),
    )
    .unwrap();

    assert_eq!(file.chunks.len(), 3);
    let plain_sizes: Vec<usize> = file
        .chunks
        .iter()
        .map(|c| c.envelope.ciphertext.len() - zkv_crypto::TAG_SIZE)
        .collect();
    assert_eq!(plain_sizes, vec![1_048_576, 1_048_576, 524_288]);
    assert_eq!(
        file.chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    file.chunks.reverse();
    let file = server_roundtrip(&file);
    let restored = decrypt_file(&key, &file, ChunkMode::Sequential).unwrap();
    assert_eq!(restored, data);
}

#[tokio::test]
async fn file_records_roundtrip_through_sessions() {
    let stored = registered();
    let data = b"quarterly numbers, do not share".repeat(1000);

    let mut km = KeyManager::new(SessionConfig {
        chunks: ChunkOptions {
            chunk_size: 4096,
            mode: ChunkMode::Parallel,
        },
        ..fast_config()
    });
    km.login(EMAIL, &SecretString::from("correcthorse1"), &stored)
        .unwrap();
    let record = km
        .seal_file("file-1", Some("proj_1_abc"), &data, "q3.txt", "text/plain")
        .unwrap();
    assert_eq!(record.file_size, data.len() as u64);
    assert_eq!(record.encrypted_file.chunks.len(), data.len().div_ceil(4096));
    let record = server_roundtrip(&record);
    km.logout();

    let mut km = KeyManager::new(fast_config());
    km.login(EMAIL, &SecretString::from("correcthorse1"), &stored)
        .unwrap();
    assert_eq!(km.open_file(&record).await.unwrap(), data);
}

#[test]
fn kdf_params_recorded_at_registration_drive_login() {
    let mut km = KeyManager::new(SessionConfig {
        kdf: KdfParams::with_iterations(1_234),
        ..SessionConfig::default()
    });
    let record = km
        .register(EMAIL, &SecretString::from("correcthorse1"))
        .unwrap();
    assert_eq!(record.kdf.iterations, 1_234);
    km.logout();

    // a session whose default has since changed still logs the user in
    let mut km = KeyManager::new(fast_config());
    km.login(EMAIL, &SecretString::from("correcthorse1"), &record)
        .unwrap();

    // but tampering with the recorded params breaks the derivation
    let mut tampered = record.clone();
    tampered.kdf.iterations = 1_000;
    let mut km = KeyManager::new(fast_config());
    assert!(matches!(
        km.login(EMAIL, &SecretString::from("correcthorse1"), &tampered),
        Err(CryptoError::InvalidCredentials)
    ));
}

#[test]
fn oversized_recorded_iteration_count_is_refused() {
    let mut km = KeyManager::new(fast_config());
    let mut record = km
        .register(EMAIL, &SecretString::from("correcthorse1"))
        .unwrap();
    km.logout();

    record.kdf.iterations = u32::MAX;
    assert!(matches!(
        km.login(EMAIL, &SecretString::from("correcthorse1"), &record),
        Err(CryptoError::Validation(_))
    ));
    assert!(!km.is_authenticated());
}
