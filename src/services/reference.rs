use rand::Rng;

pub const REFERENCE_PREFIX: &str = "BK-";
pub const REFERENCE_LEN: usize = 8;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Источник номеров брони. Номера случайные, уникальность проверяет БД.
pub trait ReferenceGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `BK-` + 8 uppercase alphanumerics from the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomReference;

impl ReferenceGenerator for RandomReference {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..REFERENCE_LEN)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();
        format!("{REFERENCE_PREFIX}{suffix}")
    }
}

pub fn is_well_formed(reference: &str) -> bool {
    reference
        .strip_prefix(REFERENCE_PREFIX)
        .is_some_and(|suffix| {
            suffix.len() == REFERENCE_LEN
                && suffix.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_references_are_well_formed() {
        let generator = RandomReference;
        for _ in 0..200 {
            let reference = generator.generate();
            assert!(is_well_formed(&reference), "bad reference {reference}");
        }
    }

    #[test]
    fn generated_references_do_not_repeat() {
        let generator = RandomReference;
        let seen: HashSet<String> = (0..1_000).map(|_| generator.generate()).collect();
        assert_eq!(seen.len(), 1_000);
    }

    #[test]
    fn rejects_malformed_references() {
        assert!(is_well_formed("BK-A1B2C3D4"));
        assert!(!is_well_formed("BK-a1b2c3d4"));
        assert!(!is_well_formed("BK-A1B2C3"));
        assert!(!is_well_formed("XX-A1B2C3D4"));
        assert!(!is_well_formed("BK-A1B2-3D4"));
    }
}
