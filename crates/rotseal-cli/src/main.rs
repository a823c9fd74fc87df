use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use x509_parser::prelude::*;
use zeroize::Zeroize;

use rotseal_core::credential::AUX_KEY_ID;
use rotseal_core::hash::{HmacAlgorithm, SoftwareHash};
use rotseal_core::kdf::nist800_108_counter_mode;
use rotseal_core::keystore::{FileKeystore, Keystore};
use rotseal_core::pcr::{PcrStore, SealingPolicy, PCR_CLAUSE_LEN};
use rotseal_core::security::disable_core_dumps;
use rotseal_core::unseal::{SeedPadding, SeedType, UnsealRequest, UNSEAL_KEY_LEN};
use rotseal_core::x509::RcgenX509;
use rotseal_core::{AuxAttestation, DeviceIdentity, EccEngine, RsaEngine, SoftEcc, SoftRsa};

/// Keystore slot for the device's ECC identity key (ECDH unsealing).
const IDENTITY_KEY_ID: u32 = 2;

/// Sealed blob file magic.
const BLOB_MAGIC: &[u8; 6] = b"RSEAL1";

/// Wire value for HMAC-SHA256 in the blob envelope.
const HMAC_SHA256_WIRE: u8 = 0x00;

#[derive(Parser)]
#[command(name = "rotseal", version, about = "Provision and exercise the auxiliary attestation core")]
struct Cli {
    /// Keystore file for the device keys
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the attestation RSA key and the ECC identity key
    Keygen {
        /// Also write the RSA public key (SPKI DER) for the sealing side
        #[arg(long)]
        export_public: Option<PathBuf>,
    },
    /// Issue the device certificate, signed by the given CA
    Certify {
        /// CA certificate (DER)
        #[arg(long)]
        ca: PathBuf,
        /// CA private key (PKCS#8 DER)
        #[arg(long)]
        ca_key: PathBuf,
        /// Device identifier placed in the certificate subject
        #[arg(long, default_value = "rotseal-device")]
        device_id: String,
        /// Where to write the issued certificate (DER)
        #[arg(long)]
        out: PathBuf,
    },
    /// Erase the attestation credential and identity key
    Erase,
    /// Seal a payload to a device (run by the verifier)
    Seal {
        /// Device RSA public key (SPKI DER)
        #[arg(long, conflicts_with = "cert")]
        public_key: Option<PathBuf>,
        /// Device certificate (DER); the public key is taken from it
        #[arg(long)]
        cert: Option<PathBuf>,
        /// Seed padding scheme
        #[arg(long, value_enum, default_value_t = PaddingArg::OaepSha256)]
        padding: PaddingArg,
        /// Policy clause per PCR bank: a hex SHA-256 digest, or "any"
        #[arg(long = "policy")]
        policy: Vec<String>,
        /// Payload file to seal
        #[arg(long)]
        payload: PathBuf,
        /// Where to write the sealed blob
        #[arg(long)]
        out: PathBuf,
    },
    /// Unseal a sealed blob against the local measurement state
    Unseal {
        /// Sealed blob file
        #[arg(long)]
        blob: PathBuf,
        /// Current PCR value as bank:hex-digest (repeatable)
        #[arg(long = "pcr")]
        pcr: Vec<String>,
        /// Where to write the recovered payload
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PaddingArg {
    Pkcs1v15,
    OaepSha1,
    OaepSha256,
}

impl PaddingArg {
    fn wire(self) -> u8 {
        match self {
            PaddingArg::Pkcs1v15 => SeedPadding::Pkcs1v15 as u8,
            PaddingArg::OaepSha1 => SeedPadding::OaepSha1 as u8,
            PaddingArg::OaepSha256 => SeedPadding::OaepSha256 as u8,
        }
    }
}

/// On-disk envelope for one sealed payload.
#[derive(Serialize, Deserialize)]
struct SealedBlob {
    seed_type: u8,
    padding: u8,
    hmac_alg: u8,
    seed: Vec<u8>,
    hmac: Vec<u8>,
    ciphertext: Vec<u8>,
    /// Contiguous 64-byte policy clauses
    policy: Vec<u8>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    disable_core_dumps().ok();

    let cli = Cli::parse();
    let store = cli.store.unwrap_or_else(default_store_path);

    match cli.command {
        Command::Keygen { export_public } => keygen(&store, export_public),
        Command::Certify {
            ca,
            ca_key,
            device_id,
            out,
        } => certify(&store, &ca, &ca_key, &device_id, &out),
        Command::Erase => erase(&store),
        Command::Seal {
            public_key,
            cert,
            padding,
            policy,
            payload,
            out,
        } => seal(public_key, cert, padding, &policy, &payload, &out),
        Command::Unseal { blob, pcr, out } => unseal(&store, &blob, &pcr, &out),
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rotseal")
        .join("keys.bin")
}

fn open_store(path: &PathBuf) -> Result<FileKeystore> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(FileKeystore::open(path)?)
}

fn keygen(store: &PathBuf, export_public: Option<PathBuf>) -> Result<()> {
    let mut keystore = open_store(store)?;
    let mut rsa = SoftRsa::new();
    let mut ecc = SoftEcc::new();

    let mut aux = AuxAttestation::new();
    aux.generate_key(&mut keystore, &mut rsa)?;

    let identity_key = ecc.generate_key()?;
    keystore.save_key(IDENTITY_KEY_ID, &identity_key)?;

    if let Some(path) = export_public {
        let private = keystore.load_key(AUX_KEY_ID)?;
        let public = rsa.public_key_der(&private)?;
        fs::write(&path, public)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("public key written to {}", path.display());
    }
    println!("attestation keys generated in {}", store.display());
    Ok(())
}

fn certify(
    store: &PathBuf,
    ca: &PathBuf,
    ca_key: &PathBuf,
    device_id: &str,
    out: &PathBuf,
) -> Result<()> {
    let keystore = open_store(store)?;
    let ca_der = fs::read(ca).with_context(|| format!("reading {}", ca.display()))?;
    let ca_key_der = fs::read(ca_key).with_context(|| format!("reading {}", ca_key.display()))?;

    let identity_key = keystore
        .load_key(IDENTITY_KEY_ID)
        .context("device identity missing; run keygen first")?;
    let identity = DeviceIdentity::new(device_id, identity_key.as_slice().to_vec());

    let mut aux = AuxAttestation::new();
    aux.create_certificate(
        &keystore,
        &RcgenX509::new(),
        &mut OsRng,
        &identity,
        &ca_der,
        &ca_key_der,
    )?;
    let cert = aux
        .certificate()
        .context("certificate missing after issuance")?;
    fs::write(out, cert).with_context(|| format!("writing {}", out.display()))?;
    println!("certificate written to {}", out.display());
    Ok(())
}

fn erase(store: &PathBuf) -> Result<()> {
    let mut keystore = open_store(store)?;
    let mut aux = AuxAttestation::new();
    aux.erase_key(&mut keystore)?;
    keystore.erase_key(IDENTITY_KEY_ID)?;
    println!("attestation credential erased");
    Ok(())
}

fn parse_policy(args: &[String]) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(args.len() * PCR_CLAUSE_LEN);
    for arg in args {
        let mut clause = [0u8; PCR_CLAUSE_LEN];
        if arg != "any" {
            let digest = hex::decode(arg)
                .with_context(|| format!("bad policy digest {arg:?}"))?;
            if digest.len() > PCR_CLAUSE_LEN {
                bail!("policy digest {arg:?} longer than {PCR_CLAUSE_LEN} bytes");
            }
            if digest.iter().all(|&b| b == 0) {
                bail!("all-zero policy digest is reserved for \"any\"");
            }
            clause[..digest.len()].copy_from_slice(&digest);
        }
        raw.extend_from_slice(&clause);
    }
    Ok(raw)
}

fn seal(
    public_key: Option<PathBuf>,
    cert: Option<PathBuf>,
    padding: PaddingArg,
    policy_args: &[String],
    payload: &PathBuf,
    out: &PathBuf,
) -> Result<()> {
    let spki = match (public_key, cert) {
        (Some(path), _) => fs::read(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, Some(path)) => {
            let der = fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let (_, parsed) = X509Certificate::from_der(&der)
                .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
            parsed.tbs_certificate.subject_pki.raw.to_vec()
        }
        (None, None) => bail!("either --public-key or --cert is required"),
    };
    let device_key = RsaPublicKey::from_public_key_der(&spki)
        .context("device key is not an RSA SubjectPublicKeyInfo")?;

    let plaintext = fs::read(payload)
        .with_context(|| format!("reading {}", payload.display()))?;
    let policy = parse_policy(policy_args)?;

    let mut kdk = [0u8; 32];
    OsRng.fill_bytes(&mut kdk);
    let seed = match padding {
        PaddingArg::Pkcs1v15 => device_key.encrypt(&mut OsRng, Pkcs1v15Encrypt, &kdk),
        PaddingArg::OaepSha1 => device_key.encrypt(&mut OsRng, Oaep::new::<Sha1>(), &kdk),
        PaddingArg::OaepSha256 => device_key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), &kdk),
    }
    .context("seed encryption failed")?;

    let (mut signing_key, mut encryption_key) = derive_keys(&kdk)?;
    kdk.zeroize();

    // one fresh encryption key per blob, so the zero nonce is single-use
    let ciphertext = encrypt_payload(&encryption_key, &plaintext)?;
    encryption_key.zeroize();

    let hmac = {
        use hmac::Mac;
        let mut mac = hmac::Hmac::<Sha256>::new_from_slice(&signing_key)
            .map_err(|_| anyhow::anyhow!("hmac key"))?;
        mac.update(&policy);
        mac.update(&ciphertext);
        mac.finalize().into_bytes().to_vec()
    };
    signing_key.zeroize();

    let blob = SealedBlob {
        seed_type: SeedType::Rsa as u8,
        padding: padding.wire(),
        hmac_alg: HMAC_SHA256_WIRE,
        seed,
        hmac,
        ciphertext,
        policy,
    };
    let mut bytes = BLOB_MAGIC.to_vec();
    bytes.extend_from_slice(&postcard::to_allocvec(&blob)?);
    fs::write(out, bytes).with_context(|| format!("writing {}", out.display()))?;
    println!("sealed blob written to {}", out.display());
    Ok(())
}

fn unseal(store: &PathBuf, blob_path: &PathBuf, pcr_args: &[String], out: &PathBuf) -> Result<()> {
    let bytes = fs::read(blob_path)
        .with_context(|| format!("reading {}", blob_path.display()))?;
    let body = bytes
        .strip_prefix(BLOB_MAGIC.as_slice())
        .context("not a sealed blob (bad magic)")?;
    let blob: SealedBlob = postcard::from_bytes(body).context("malformed sealed blob")?;

    let seed_type = SeedType::try_from(blob.seed_type)?;
    let padding = SeedPadding::try_from(blob.padding)?;
    if blob.hmac_alg != HMAC_SHA256_WIRE {
        bail!("unsupported hmac algorithm {:#04x}", blob.hmac_alg);
    }
    let sealing = SealingPolicy::parse(&blob.policy)?;

    let mut pcrs = PcrStore::new(rotseal_core::MAX_POLICY_CLAUSES);
    for arg in pcr_args {
        let (bank, digest) = arg
            .split_once(':')
            .with_context(|| format!("--pcr takes bank:hex-digest, got {arg:?}"))?;
        let bank: usize = bank.parse().with_context(|| format!("bad bank {bank:?}"))?;
        let digest = hex::decode(digest)
            .with_context(|| format!("bad digest in {arg:?}"))?;
        let digest: [u8; 32] = digest
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("--pcr digest must be 32 bytes"))?;
        pcrs.set(bank, digest)?;
    }

    let keystore = open_store(store)?;
    let identity = match keystore.load_key(IDENTITY_KEY_ID) {
        Ok(key) => DeviceIdentity::new("rotseal-device", key.as_slice().to_vec()),
        Err(_) => DeviceIdentity::new("rotseal-device", Vec::new()),
    };

    let aux = AuxAttestation::new();
    let rsa = SoftRsa::new();
    let mut ecc = SoftEcc::new();
    let mut hash = SoftwareHash::new();
    let request = UnsealRequest {
        seed: &blob.seed,
        seed_type,
        padding,
        hmac_algorithm: HmacAlgorithm::Sha256,
        hmac_tag: &blob.hmac,
        ciphertext: &blob.ciphertext,
        sealing: &sealing,
        key_length: UNSEAL_KEY_LEN,
    };
    let key = aux.unseal(
        &keystore,
        Some(&rsa),
        Some(&mut ecc),
        &mut hash,
        &pcrs,
        &identity,
        &request,
    )?;

    let plaintext = decrypt_payload(&key[..], &blob.ciphertext)?;
    fs::write(out, plaintext).with_context(|| format!("writing {}", out.display()))?;
    println!("payload written to {}", out.display());
    Ok(())
}

fn derive_keys(kdk: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    let mut hash = SoftwareHash::new();
    let mut signing = [0u8; 32];
    let mut encryption = [0u8; 32];
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha256, kdk, b"signing key", b"", &mut signing)?;
    nist800_108_counter_mode(
        &mut hash,
        HmacAlgorithm::Sha256,
        kdk,
        b"encryption key",
        b"",
        &mut encryption,
    )?;
    Ok((signing, encryption))
}

fn encrypt_payload(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    use aes_gcm::aead::{Aead, KeyInit};
    let cipher = aes_gcm::Aes256Gcm::new_from_slice(key)
        .map_err(|_| anyhow::anyhow!("payload key"))?;
    cipher
        .encrypt(aes_gcm::Nonce::from_slice(&[0u8; 12]), plaintext)
        .map_err(|_| anyhow::anyhow!("payload encryption failed"))
}

fn decrypt_payload(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    use aes_gcm::aead::{Aead, KeyInit};
    let cipher = aes_gcm::Aes256Gcm::new_from_slice(key)
        .map_err(|_| anyhow::anyhow!("payload key"))?;
    cipher
        .decrypt(aes_gcm::Nonce::from_slice(&[0u8; 12]), ciphertext)
        .map_err(|_| anyhow::anyhow!("payload decryption failed"))
}
