use rand::{distributions::Alphanumeric, thread_rng, Rng};

pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// A uniform random 6-digit numeric string, e.g. `"473829"`.
pub fn random_room_id() -> String {
    let n: u32 = thread_rng().gen_range(100_000..1_000_000);
    format!("{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_room_id_is_always_six_digits() {
        for _ in 0..1000 {
            let id = random_room_id();
            assert_eq!(id.len(), 6);
            assert!(id.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn random_string_has_requested_length() {
        assert_eq!(random_string(32).len(), 32);
    }
}
