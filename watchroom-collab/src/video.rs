use serde::{Deserialize, Serialize};

/// A video as described by the external catalog adapter.
///
/// Equality and hashing are by `id` alone - a room's queue is a set with
/// respect to membership checks even though it's stored and serialized
/// as an ordered sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    /// Duration in seconds.
    pub duration: f64,
    /// Human-readable duration, e.g. "3:45".
    pub formatted_duration: String,
    pub thumbnail: String,
    pub channel: String,
    #[serde(default)]
    pub channel_verified: bool,
    pub upload_date: String,
    #[serde(default)]
    pub view_count: u64,
    pub url: String,
}

impl PartialEq for Video {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Video {}

/// Formats a duration in seconds as `h:mm:ss` or `m:ss`, matching what
/// the external catalog adapter would otherwise have to be asked for.
pub fn format_duration(total_seconds: f64) -> String {
    let total_seconds = total_seconds.max(0.0).round() as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sub_hour_durations() {
        assert_eq!(format_duration(65.0), "1:05");
        assert_eq!(format_duration(9.0), "0:09");
    }

    #[test]
    fn formats_multi_hour_durations() {
        assert_eq!(format_duration(3725.0), "1:02:05");
    }

    #[test]
    fn equality_ignores_metadata() {
        let a = Video {
            id: "v1".into(),
            title: "A".into(),
            duration: 10.0,
            formatted_duration: "0:10".into(),
            thumbnail: String::new(),
            channel: String::new(),
            channel_verified: false,
            upload_date: String::new(),
            view_count: 0,
            url: String::new(),
        };
        let mut b = a.clone();
        b.title = "Different title".into();

        assert_eq!(a, b);
    }
}
