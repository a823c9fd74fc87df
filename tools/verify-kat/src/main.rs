use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;

#[derive(Deserialize)]
struct KatFile {
    vectors: Vec<Kat>,
}

#[derive(Deserialize)]
struct Kat {
    alg: String,
    ki_hex: String,
    label_hex: String,
    context_hex: String,
    ko_hex: String,
}

/// Independent SP 800-108 counter-mode rendition, kept separate from the
/// rotseal-core implementation so the two can cross-check each other.
fn derive_sha1(ki: &[u8], label: &[u8], context: &[u8], out_len: usize) -> Vec<u8> {
    let l_bits = (out_len * 8) as u32;
    let mut out = Vec::with_capacity(out_len);
    let mut i: u32 = 1;
    while out.len() < out_len {
        let mut mac = Hmac::<Sha1>::new_from_slice(ki).expect("hmac key");
        mac.update(&i.to_be_bytes());
        mac.update(label);
        mac.update(&[0u8]);
        mac.update(context);
        mac.update(&l_bits.to_be_bytes());
        out.extend_from_slice(&mac.finalize().into_bytes());
        i += 1;
    }
    out.truncate(out_len);
    out
}

fn derive_sha256(ki: &[u8], label: &[u8], context: &[u8], out_len: usize) -> Vec<u8> {
    let l_bits = (out_len * 8) as u32;
    let mut out = Vec::with_capacity(out_len);
    let mut i: u32 = 1;
    while out.len() < out_len {
        let mut mac = Hmac::<Sha256>::new_from_slice(ki).expect("hmac key");
        mac.update(&i.to_be_bytes());
        mac.update(label);
        mac.update(&[0u8]);
        mac.update(context);
        mac.update(&l_bits.to_be_bytes());
        out.extend_from_slice(&mac.finalize().into_bytes());
        i += 1;
    }
    out.truncate(out_len);
    out
}

fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).expect("usage: verify-kat file.json");
    let data = std::fs::read_to_string(path)?;
    let kats: KatFile = serde_json::from_str(&data)?;

    for (index, kat) in kats.vectors.iter().enumerate() {
        let ki = hex::decode(&kat.ki_hex)?;
        let label = hex::decode(&kat.label_hex)?;
        let context = hex::decode(&kat.context_hex)?;
        let expected = hex::decode(&kat.ko_hex)?;

        let got = match kat.alg.as_str() {
            "hmac-sha1" => derive_sha1(&ki, &label, &context, expected.len()),
            "hmac-sha256" => derive_sha256(&ki, &label, &context, expected.len()),
            other => anyhow::bail!("vector {index}: unknown alg {other:?}"),
        };
        if got != expected {
            anyhow::bail!(
                "vector {index} ({}, {} bytes) mismatch: got {}",
                kat.alg,
                expected.len(),
                hex::encode(&got)
            );
        }
    }

    println!("KAT OK");
    Ok(())
}
