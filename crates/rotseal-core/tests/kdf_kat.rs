use hex_literal::hex;

use rotseal_core::hash::{HashEngine, HashError, HmacAlgorithm, SoftwareHash};
use rotseal_core::kdf::{nist800_108_counter_mode, KdfError};

// NIST SP 800-108 counter-mode vectors (CAVP-derived); shared inputs across
// all five known answers.
const KI: [u8; 32] = hex!(
    "f13b43162ce40234d64180fa1a0e0a04"
    "0e9a37ff3ea0057573c55410add5c5c6"
);
const LABEL: [u8; 32] = hex!(
    "0e9a37ff3ea0027573c55410add5c5c6"
    "f13b43162ce40534d64180fa1a0e0a04"
);
const CONTEXT: [u8; 32] = hex!(
    "f13b43162c0e9a37e4057573c55410ad"
    "ff3ea00234d64180fa1a0e0a04d5c5c6"
);

#[test]
fn counter_mode_sha1() {
    let mut hash = SoftwareHash::new();
    let mut ko = [0u8; 20];
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha1, &KI, &LABEL, &CONTEXT, &mut ko)
        .unwrap();
    assert_eq!(ko, hex!("063b74131df3f9b2f7254eabaed3c49b20f52261"));
}

#[test]
fn counter_mode_sha256() {
    let mut hash = SoftwareHash::new();
    let mut ko = [0u8; 32];
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha256, &KI, &LABEL, &CONTEXT, &mut ko)
        .unwrap();
    assert_eq!(
        ko,
        hex!("e648d4c70dc15975a14b0a9175d917102175bc9a926f6d2493daf39811c397f8")
    );
}

#[test]
fn counter_mode_key_larger_than_hash() {
    let mut hash = SoftwareHash::new();
    let mut ko = [0u8; 64];
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha256, &KI, &LABEL, &CONTEXT, &mut ko)
        .unwrap();
    assert_eq!(
        ko,
        hex!(
            "42a1d97c1bb48378c1a9b9b0c613fc5da4ab5c9e69e2c8fd72a3328fb920f90a"
            "764da3b84ca17703adbca05705b0b1619f7b97c733d6fae1f18ac5dc6479dc5a"
        )
    );
}

#[test]
fn counter_mode_key_three_blocks() {
    let mut hash = SoftwareHash::new();
    let mut ko = [0u8; 96];
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha256, &KI, &LABEL, &CONTEXT, &mut ko)
        .unwrap();
    assert_eq!(
        ko,
        hex!(
            "638e99880ce02f4cdec2b5ac398117c7"
            "0c979c97ee69e5da005e6c2c0226793a"
            "c8991c1a2fa75e8c082ff5887ec3eaea"
            "398cd0a083ccf4590a72b334f6693c90"
            "6b3e315f68223b9e593aeeb6825fb46d"
            "2e3d3d998486ccee9335974a0a1a6520"
        )
    );
}

#[test]
fn counter_mode_key_not_block_multiple() {
    let mut hash = SoftwareHash::new();
    let mut ko = [0u8; 50];
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha256, &KI, &LABEL, &CONTEXT, &mut ko)
        .unwrap();
    assert_eq!(
        ko,
        hex!(
            "0decbed2238f0954b92ce6ff4448d908"
            "a4529619306380150d5afe42d493eee9"
            "274a75ae2b0788289a91b1bc050e18d4"
            "5b00"
        )
    );
}

#[test]
fn counter_mode_is_deterministic() {
    let mut hash = SoftwareHash::new();
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha256, &KI, &LABEL, &CONTEXT, &mut first)
        .unwrap();
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha256, &KI, &LABEL, &CONTEXT, &mut second)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn longer_output_extends_shorter() {
    let mut hash = SoftwareHash::new();
    let mut short = [0u8; 32];
    let mut long = [0u8; 96];
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha256, &KI, &LABEL, &CONTEXT, &mut short)
        .unwrap();
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha256, &KI, &LABEL, &CONTEXT, &mut long)
        .unwrap();
    assert_eq!(long[..32], short);

    let mut fifty = [0u8; 50];
    nist800_108_counter_mode(&mut hash, HmacAlgorithm::Sha256, &KI, &LABEL, &CONTEXT, &mut fifty)
        .unwrap();
    assert_eq!(long[..50], fifty);
}

// --- failure injection -----------------------------------------------------

/// Operations the KDF drives on the hash engine, in call order for a
/// single-block derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailPoint {
    Start,
    UpdateIndex,
    UpdateLabel,
    UpdateSeparator,
    UpdateContext,
    UpdateOutputLen,
    Finish,
}

/// Hash engine that fails at one chosen operation and records whether the
/// context was cancelled afterwards.
struct FlakyHash {
    inner: SoftwareHash,
    fail_at: FailPoint,
    op: usize,
    cancelled: bool,
}

impl FlakyHash {
    fn new(fail_at: FailPoint) -> Self {
        Self {
            inner: SoftwareHash::new(),
            fail_at,
            op: 0,
            cancelled: false,
        }
    }

    fn should_fail(&mut self, point: FailPoint) -> bool {
        point == self.fail_at
    }
}

impl HashEngine for FlakyHash {
    fn hmac_start(&mut self, alg: HmacAlgorithm, key: &[u8]) -> Result<(), HashError> {
        self.op = 0;
        if self.should_fail(FailPoint::Start) {
            return Err(HashError::Engine("injected"));
        }
        self.inner.hmac_start(alg, key)
    }

    fn update(&mut self, data: &[u8]) -> Result<(), HashError> {
        let point = match self.op {
            0 => FailPoint::UpdateIndex,
            1 => FailPoint::UpdateLabel,
            2 => FailPoint::UpdateSeparator,
            3 => FailPoint::UpdateContext,
            _ => FailPoint::UpdateOutputLen,
        };
        self.op += 1;
        if self.should_fail(point) {
            return Err(HashError::Engine("injected"));
        }
        self.inner.update(data)
    }

    fn finish(&mut self, out: &mut [u8]) -> Result<usize, HashError> {
        if self.should_fail(FailPoint::Finish) {
            return Err(HashError::Engine("injected"));
        }
        self.inner.finish(out)
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        self.inner.cancel();
    }
}

#[test]
fn engine_failure_propagates_from_every_step() {
    let points = [
        FailPoint::Start,
        FailPoint::UpdateIndex,
        FailPoint::UpdateLabel,
        FailPoint::UpdateSeparator,
        FailPoint::UpdateContext,
        FailPoint::UpdateOutputLen,
        FailPoint::Finish,
    ];
    for point in points {
        let mut hash = FlakyHash::new(point);
        let mut ko = [0u8; 32];
        let status = nist800_108_counter_mode(
            &mut hash,
            HmacAlgorithm::Sha256,
            &KI,
            &LABEL,
            &CONTEXT,
            &mut ko,
        );
        assert_eq!(
            status,
            Err(KdfError::Hash(HashError::Engine("injected"))),
            "failure at {point:?} must surface unchanged"
        );
        if point != FailPoint::Start {
            assert!(hash.cancelled, "context not cancelled after {point:?}");
        }
        // the engine is reusable once the KDF has cleaned up
        assert!(hash.inner.hmac_start(HmacAlgorithm::Sha256, b"k").is_ok());
    }
}
