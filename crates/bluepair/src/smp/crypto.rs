//! Cryptographic functions for the Security Manager Protocol
//!
//! This module implements the security toolbox of the Bluetooth Core
//! Specification (Vol 3, Part H, 2.2). All byte arrays are taken and returned
//! in little-endian order, the order in which they appear in SMP PDUs. The
//! functions reverse them internally into the most-significant-octet-first
//! order the toolbox is specified in. [`aes_128`] and [`aes_cmac`] are the raw
//! primitives and work in big-endian order like FIPS-197 and RFC 4493.

use crate::error::CryptoError;
use crate::gap::Address;
use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use super::constants::SMP_PASSKEY_MAX;

/// Salt used by f5 to derive its key T from the DHKey
const F5_SALT: [u8; 16] = [
    0x6c, 0x88, 0x83, 0x91, 0xaa, 0xf5, 0xa5, 0x38, 0x60, 0x37, 0x0b, 0xdb, 0x5a, 0x60, 0x83, 0xbe,
];

/// keyID "btle"
const F5_KEY_ID: [u8; 4] = [0x62, 0x74, 0x6c, 0x65];

/// Length of the f5 output in bits, big-endian
const F5_LENGTH: [u8; 2] = [0x01, 0x00];

fn swap<const N: usize>(src: &[u8; N]) -> [u8; N] {
    let mut out = *src;
    out.reverse();
    out
}

/// Fill a buffer from the OS CSPRNG
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Generate a 128-bit random number
pub fn generate_random_128() -> [u8; 16] {
    let mut out = [0u8; 16];
    fill_random(&mut out);
    out
}

/// Generate a random passkey (0-999999)
pub fn generate_passkey() -> u32 {
    OsRng.gen_range(0..=SMP_PASSKEY_MAX)
}

/// AES-128 block encryption, big-endian key and block (FIPS-197)
pub fn aes_128(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut data = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut data);

    let mut out = [0u8; 16];
    out.copy_from_slice(&data);
    out
}

/// Security function e (BT Core Spec Vol 3, Part H, 2.2.1), little-endian
pub fn aes_encrypt(key: &[u8; 16], plaintext: &[u8; 16]) -> [u8; 16] {
    swap(&aes_128(&swap(key), &swap(plaintext)))
}

/// AES-CMAC function (BT Core Spec Vol 3, Part H, 2.2.5; RFC 4493)
pub fn aes_cmac(key: &[u8; 16], message: &[u8]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(key));
    mac.update(message);
    let tag = mac.finalize().into_bytes();

    let mut out = [0u8; 16];
    out.copy_from_slice(&tag);
    out
}

fn xor_128(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

/// Function c1 for LE Legacy Pairing (BT Core Spec Vol 3, Part H, 2.2.3)
///
/// `preq` and `pres` are the complete 7-octet Pairing Request and Pairing
/// Response PDUs, opcode included.
pub fn c1(
    k: &[u8; 16],
    r: &[u8; 16],
    preq: &[u8],
    pres: &[u8],
    initiator: &Address,
    responder: &Address,
) -> Result<[u8; 16], CryptoError> {
    for pdu in [preq, pres] {
        if pdu.len() != 7 {
            return Err(CryptoError::InvalidLength {
                expected: 7,
                actual: pdu.len(),
            });
        }
    }

    // p1 = pres || preq || rat || iat
    let mut p1 = [0u8; 16];
    p1[0] = initiator.type_octet();
    p1[1] = responder.type_octet();
    p1[2..9].copy_from_slice(preq);
    p1[9..16].copy_from_slice(pres);

    // p2 = padding || ia || ra
    let mut p2 = [0u8; 16];
    p2[0..6].copy_from_slice(&responder.addr.bytes);
    p2[6..12].copy_from_slice(&initiator.addr.bytes);

    let enc = aes_encrypt(k, &xor_128(r, &p1));
    Ok(aes_encrypt(k, &xor_128(&enc, &p2)))
}

/// Function s1 for LE Legacy Pairing (BT Core Spec Vol 3, Part H, 2.2.4)
///
/// The STK is `s1(TK, Srand, Mrand)`.
pub fn s1(k: &[u8; 16], r1: &[u8; 16], r2: &[u8; 16]) -> [u8; 16] {
    // r' = r1' || r2', least significant halves only
    let mut r_prime = [0u8; 16];
    r_prime[0..8].copy_from_slice(&r2[0..8]);
    r_prime[8..16].copy_from_slice(&r1[0..8]);

    aes_encrypt(k, &r_prime)
}

/// Diversifying function d1 (BT Core Spec Vol 3, Part H, Appendix B.2.1)
pub fn d1(k: &[u8; 16], d: u16, r: u16) -> [u8; 16] {
    // d' = padding || r || d
    let mut d_prime = [0u8; 16];
    d_prime[0..2].copy_from_slice(&d.to_le_bytes());
    d_prime[2..4].copy_from_slice(&r.to_le_bytes());

    aes_encrypt(k, &d_prime)
}

/// Function f4 for LE Secure Connections (BT Core Spec Vol 3, Part H, 2.2.6)
pub fn f4(u: &[u8; 32], v: &[u8; 32], x: &[u8; 16], z: u8) -> [u8; 16] {
    let mut message = Vec::with_capacity(65);
    message.extend_from_slice(&swap(u));
    message.extend_from_slice(&swap(v));
    message.push(z);

    swap(&aes_cmac(&swap(x), &message))
}

/// Function f5 for LE Secure Connections (BT Core Spec Vol 3, Part H, 2.2.7)
///
/// `a1` and `a2` are the 7-octet addresses as produced by
/// [`Address::to_le_bytes`]. Returns `(MacKey, LTK)`.
pub fn f5(
    w: &[u8; 32],
    n1: &[u8; 16],
    n2: &[u8; 16],
    a1: &[u8; 7],
    a2: &[u8; 7],
) -> ([u8; 16], [u8; 16]) {
    let t = aes_cmac(&F5_SALT, &swap(w));

    let mut message = [0u8; 53];
    message[1..5].copy_from_slice(&F5_KEY_ID);
    message[5..21].copy_from_slice(&swap(n1));
    message[21..37].copy_from_slice(&swap(n2));
    message[37..44].copy_from_slice(&swap(a1));
    message[44..51].copy_from_slice(&swap(a2));
    message[51..53].copy_from_slice(&F5_LENGTH);

    let mac_key = swap(&aes_cmac(&t, &message));

    message[0] = 0x01;
    let ltk = swap(&aes_cmac(&t, &message));

    (mac_key, ltk)
}

/// Function f6 for LE Secure Connections (BT Core Spec Vol 3, Part H, 2.2.8)
///
/// `io_cap` is `[IO capability, OOB flag, AuthReq]`.
pub fn f6(
    w: &[u8; 16],
    n1: &[u8; 16],
    n2: &[u8; 16],
    r: &[u8; 16],
    io_cap: &[u8; 3],
    a1: &[u8; 7],
    a2: &[u8; 7],
) -> [u8; 16] {
    let mut message = Vec::with_capacity(65);
    message.extend_from_slice(&swap(n1));
    message.extend_from_slice(&swap(n2));
    message.extend_from_slice(&swap(r));
    message.extend_from_slice(&swap(io_cap));
    message.extend_from_slice(&swap(a1));
    message.extend_from_slice(&swap(a2));

    swap(&aes_cmac(&swap(w), &message))
}

/// Function g2 for LE Secure Connections (BT Core Spec Vol 3, Part H, 2.2.9)
///
/// Returns the six-digit numeric comparison value.
pub fn g2(u: &[u8; 32], v: &[u8; 32], x: &[u8; 16], y: &[u8; 16]) -> u32 {
    let mut message = Vec::with_capacity(80);
    message.extend_from_slice(&swap(u));
    message.extend_from_slice(&swap(v));
    message.extend_from_slice(&swap(y));

    let mac = aes_cmac(&swap(x), &message);
    let value = u32::from_be_bytes([mac[12], mac[13], mac[14], mac[15]]);
    value % 1_000_000
}

/// Random address hash function ah (BT Core Spec Vol 3, Part H, 2.2.2)
pub fn ah(irk: &[u8; 16], r: &[u8; 3]) -> [u8; 3] {
    // r' = padding || r
    let mut r_prime = [0u8; 16];
    r_prime[0..3].copy_from_slice(r);

    let enc = aes_encrypt(irk, &r_prime);
    [enc[0], enc[1], enc[2]]
}

/// Shorten a key to the negotiated encryption key size by zeroing its most
/// significant octets.
pub fn mask_key(key: &[u8; 16], size: u8) -> [u8; 16] {
    let mut out = *key;
    let size = usize::from(size).min(16);
    out[size..].iter_mut().for_each(|b| *b = 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::BdAddr;

    fn u256_le(hi: u128, lo: u128) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[..16].copy_from_slice(&lo.to_le_bytes());
        out[16..].copy_from_slice(&hi.to_le_bytes());
        out
    }

    fn addr7(kind: u8, addr: u64) -> [u8; 7] {
        let mut out = [0u8; 7];
        out[..6].copy_from_slice(&addr.to_le_bytes()[..6]);
        out[6] = kind;
        out
    }

    const U: (u128, u128) = (
        0x20b003d2f297be2c5e2c83a7e9f9a5b9,
        0xeff49111acf4fddbcc0301480e359de6,
    );
    const V: (u128, u128) = (
        0x55188b3d32f6bb9a900afcfbeed4e72a,
        0x59cb9ac2f19d7cfb6b4fdd49f47fc5fd,
    );
    const W: (u128, u128) = (
        0xec0234a357c8ad05341010a60a397d9b,
        0x99796b13b4f866f1868d34f373bfa698,
    );
    const N1: u128 = 0xd5cb8454d177733effffb2ec712baeab;
    const N2: u128 = 0xa6e8e7cc25a75f6e216583f7ff3dc4cf;

    #[test]
    fn test_aes_128_fips197() {
        let key = 0x000102030405060708090a0b0c0d0e0fu128.to_be_bytes();
        let pt = 0x00112233445566778899aabbccddeeffu128.to_be_bytes();
        assert_eq!(
            aes_128(&key, &pt),
            0x69c4e0d86a7b0430d8cdb78070b4c55au128.to_be_bytes()
        );
    }

    #[test]
    fn test_aes_cmac_rfc4493() {
        let key = 0x2b7e151628aed2a6abf7158809cf4f3cu128.to_be_bytes();
        assert_eq!(
            aes_cmac(&key, &[]),
            0xbb1d6929e95937287fa37d129b756746u128.to_be_bytes()
        );

        let m = 0x6bc1bee22e409f96e93d7e117393172au128.to_be_bytes();
        assert_eq!(
            aes_cmac(&key, &m),
            0x070a16b46b4d4144f79bdd9dd04a287cu128.to_be_bytes()
        );
    }

    #[test]
    fn test_c1() {
        let k = [0u8; 16];
        let r = 0x5783D52156AD6F0E6388274EC6702EE0u128.to_le_bytes();
        let preq = [0x01, 0x01, 0x00, 0x00, 0x10, 0x07, 0x07];
        let pres = [0x02, 0x03, 0x00, 0x00, 0x08, 0x00, 0x05];
        let ia = Address::random(BdAddr::from_u64(0xA1A2A3A4A5A6));
        let ra = Address::public(BdAddr::from_u64(0xB1B2B3B4B5B6));

        let confirm = c1(&k, &r, &preq, &pres, &ia, &ra).unwrap();
        assert_eq!(
            confirm,
            0x1E1E3FEF878988EAD2A74DC5BEF13B86u128.to_le_bytes()
        );
    }

    #[test]
    fn test_c1_rejects_short_pdu() {
        let ia = Address::public(BdAddr::default());
        let err = c1(&[0; 16], &[0; 16], &[0x01; 6], &[0x02; 7], &ia, &ia).unwrap_err();
        assert_eq!(
            err,
            CryptoError::InvalidLength {
                expected: 7,
                actual: 6
            }
        );
    }

    #[test]
    fn test_s1() {
        let k = [0u8; 16];
        let r1 = 0x000F0E0D0C0B0A091122334455667788u128.to_le_bytes();
        let r2 = 0x010203040506070899AABBCCDDEEFF00u128.to_le_bytes();
        assert_eq!(
            s1(&k, &r1, &r2),
            0x9a1fe1f0e8b0f49b5b4216ae796da062u128.to_le_bytes()
        );
    }

    #[test]
    fn test_d1_layout() {
        let k = generate_random_128();
        let mut d_prime = [0u8; 16];
        d_prime[0] = 0x34;
        d_prime[1] = 0x12;
        assert_eq!(d1(&k, 0x1234, 0), aes_encrypt(&k, &d_prime));
        assert_ne!(d1(&k, 0x1234, 0), d1(&k, 0x1235, 0));
    }

    #[test]
    fn test_f4() {
        let u = u256_le(U.0, U.1);
        let v = u256_le(V.0, V.1);
        let x = N1.to_le_bytes();
        assert_eq!(
            f4(&u, &v, &x, 0),
            0xf2c916f107a9bd1cf1eda1bea974872du128.to_le_bytes()
        );
    }

    #[test]
    fn test_f5() {
        let w = u256_le(W.0, W.1);
        let a1 = addr7(0x00, 0x56123737bfce);
        let a2 = addr7(0x00, 0xa713702dcfc1);
        let (mac_key, ltk) = f5(&w, &N1.to_le_bytes(), &N2.to_le_bytes(), &a1, &a2);
        assert_eq!(
            mac_key,
            0x2965f176a1084a02fd3f6a20ce636e20u128.to_le_bytes()
        );
        assert_eq!(ltk, 0x6986791169d7cd23980522b594750a38u128.to_le_bytes());
    }

    #[test]
    fn test_f5_address_layout() {
        let a1 = Address::public(BdAddr::from_u64(0x56123737bfce)).to_le_bytes();
        assert_eq!(a1, addr7(0x00, 0x56123737bfce));
    }

    #[test]
    fn test_f6() {
        let w = 0x2965f176a1084a02fd3f6a20ce636e20u128.to_le_bytes();
        let r = 0x12a3343bb453bb5408da42d20c2d0fc8u128.to_le_bytes();
        let io_cap = [0x02, 0x01, 0x01];
        let a1 = addr7(0x00, 0x56123737bfce);
        let a2 = addr7(0x00, 0xa713702dcfc1);
        assert_eq!(
            f6(&w, &N1.to_le_bytes(), &N2.to_le_bytes(), &r, &io_cap, &a1, &a2),
            0xe3c473989cd0e8c5d26c0b09da958f61u128.to_le_bytes()
        );
    }

    #[test]
    fn test_g2() {
        let u = u256_le(U.0, U.1);
        let v = u256_le(V.0, V.1);
        assert_eq!(
            g2(&u, &v, &N1.to_le_bytes(), &N2.to_le_bytes()),
            0x2f9ed5ba % 1_000_000
        );
    }

    #[test]
    fn test_ah() {
        let irk = 0xec0234a357c8ad05341010a60a397d9bu128.to_le_bytes();
        assert_eq!(ah(&irk, &[0x94, 0x81, 0x70]), [0xaa, 0xfb, 0x0d]);
    }

    #[test]
    fn test_mask_key() {
        let key = [0xFF; 16];
        let masked = mask_key(&key, 7);
        assert_eq!(&masked[..7], &[0xFF; 7]);
        assert_eq!(&masked[7..], &[0x00; 9]);
        assert_eq!(mask_key(&key, 16), key);
    }

    #[test]
    fn test_generate_passkey_range() {
        for _ in 0..100 {
            assert!(generate_passkey() <= SMP_PASSKEY_MAX);
        }
    }
}
