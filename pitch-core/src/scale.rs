//! # Musical Scale Module
//!
//! Equal temperament conversions between frequencies and discrete note
//! ids for display and scoring.
//!
//! Note ids are MIDI note numbers: A4 maps to id 69 at the reference
//! frequency (440 Hz by default), and each id is one semitone. The id
//! axis is monotonic in frequency; only the display name wraps at
//! octave boundaries.

use once_cell::sync::Lazy;

/// Note names within one octave, starting at C. Only sharps are used.
const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Lowest valid note id (MIDI 0, C-1).
pub const MIN_NOTE_ID: i32 = 0;
/// Highest valid note id (MIDI 127, G9).
pub const MAX_NOTE_ID: i32 = 127;

/// MIDI note number of the reference pitch A4.
const BASE_ID: i32 = 69;

/// Display names for every valid note id, computed once.
///
/// The octave number follows scientific pitch notation, so id 60 is
/// "C4" and id 69 is "A4".
static NAMES: Lazy<Vec<String>> = Lazy::new(|| {
    (MIN_NOTE_ID..=MAX_NOTE_ID)
        .map(|id| {
            let octave = id / 12 - 1;
            format!("{}{}", NOTE_NAMES[(id % 12) as usize], octave)
        })
        .collect()
});

/// Conversions for the equal-tempered scale.
#[derive(Debug, Clone)]
pub struct MusicalScale {
    base_freq: f32,
}

impl Default for MusicalScale {
    fn default() -> Self {
        Self::new(440.0)
    }
}

impl MusicalScale {
    /// Creates a scale anchored at the given A4 frequency.
    pub fn new(base_freq: f32) -> Self {
        Self { base_freq }
    }

    /// Returns the nearest note id for a frequency.
    ///
    /// Frequencies below 1 Hz and frequencies whose nearest note falls
    /// outside the supported id range yield `None`.
    pub fn note_id(&self, freq: f32) -> Option<i32> {
        if freq < 1.0 {
            return None;
        }
        let id = (BASE_ID as f32 + 12.0 * (freq / self.base_freq).log2()).round() as i32;
        (MIN_NOTE_ID..=MAX_NOTE_ID).contains(&id).then_some(id)
    }

    /// Returns the frequency of a note id.
    ///
    /// Exact inverse of [`MusicalScale::note_id`] at note centers:
    /// `note_id(note_freq(id)) == Some(id)` for every valid id.
    pub fn note_freq(&self, id: i32) -> f32 {
        self.base_freq * 2.0_f32.powf((id - BASE_ID) as f32 / 12.0)
    }

    /// Distance from a frequency to its nearest note, in fractional
    /// semitones (-0.5 to 0.5). Positive means sharp.
    pub fn note_offset(&self, freq: f32) -> Option<f32> {
        let id = self.note_id(freq)?;
        Some(12.0 * (freq / self.note_freq(id)).log2())
    }

    /// Returns the display name of a note id, e.g. "A4" or "C#5".
    /// Ids outside the supported range yield an empty string.
    pub fn note_str(&self, id: i32) -> String {
        usize::try_from(id)
            .ok()
            .and_then(|i| NAMES.get(i))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the note id is a sharp.
    pub fn is_sharp(&self, id: i32) -> bool {
        matches!(id.rem_euclid(12), 1 | 3 | 6 | 8 | 10)
    }
}
