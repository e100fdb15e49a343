//! Segwit address encoding (BIP 173) for witness outputs the node leaves unlabeled

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];

fn polymod(values: impl IntoIterator<Item = u8>) -> u32 {
    let mut chk: u32 = 1;
    for value in values {
        let top = chk >> 25;
        chk = ((chk & 0x1ff_ffff) << 5) ^ u32::from(value);
        for (i, generator) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= generator;
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let bytes = hrp.as_bytes();
    let mut expanded: Vec<u8> = bytes.iter().map(|b| b >> 5).collect();
    expanded.push(0);
    expanded.extend(bytes.iter().map(|b| b & 31));
    expanded
}

fn checksum(hrp: &str, data: &[u8]) -> [u8; 6] {
    let values = hrp_expand(hrp)
        .into_iter()
        .chain(data.iter().copied())
        .chain([0u8; 6]);
    let pm = polymod(values) ^ 1;
    let mut out = [0u8; 6];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = ((pm >> (5 * (5 - i))) & 31) as u8;
    }
    out
}

/// Regroup 8-bit bytes into padded 5-bit groups
fn to_five_bit(bytes: &[u8]) -> Vec<u8> {
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut out = Vec::with_capacity(bytes.len() * 8 / 5 + 1);
    for byte in bytes {
        acc = (acc << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(((acc >> bits) & 31) as u8);
        }
    }
    if bits > 0 {
        out.push(((acc << (5 - bits)) & 31) as u8);
    }
    out
}

/// Encode a segwit program. Version 0 programs must be 20 or 32 bytes.
pub fn encode(hrp: &str, version: u8, program: &[u8]) -> Option<String> {
    if version > 16 || program.len() < 2 || program.len() > 40 {
        return None;
    }
    if version == 0 && program.len() != 20 && program.len() != 32 {
        return None;
    }

    let mut data = vec![version];
    data.extend(to_five_bit(program));
    let check = checksum(hrp, &data);

    let mut address = String::with_capacity(hrp.len() + 1 + data.len() + 6);
    address.push_str(hrp);
    address.push('1');
    address.extend(
        data.iter()
            .chain(check.iter())
            .map(|d| char::from(CHARSET[usize::from(*d)])),
    );
    Some(address)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_vector() {
        let program = hex::decode("751e76e8199196d454941c45d1b3a323f1433bd6").unwrap();
        assert_eq!(
            encode("bc", 0, &program).unwrap(),
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        );
    }

    #[test]
    fn test_witness_prefixes() {
        let key_hash = hex::decode("751e76e8199196d454941c45d1b3a323f1433bd6").unwrap();
        assert_eq!(
            encode("wkh_", 0, &key_hash).unwrap(),
            "wkh_1qw508d6qejxtdg4y5r3zarvary0c5xw7k8ljyjk"
        );

        let script_hash =
            hex::decode("1863143c14c5166804bd19203356da136c985678cd4d27a1b8c6329604903262")
                .unwrap();
        assert_eq!(
            encode("wsh_", 0, &script_hash).unwrap(),
            "wsh_1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3q2tqh2x"
        );
    }

    #[test]
    fn test_invalid_program_length() {
        assert!(encode("wkh_", 0, &[0u8; 19]).is_none());
        assert!(encode("wkh_", 0, &[]).is_none());
    }
}
