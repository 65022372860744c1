//! Question source seam plus the builtin themed song catalog.

use rand::seq::{IndexedRandom, SliceRandom};

use crate::model::{Question, QuestionId};

/// Pure lookup producing the next question for a theme. Stateless from the
/// engine's point of view; cross-round repetition is the source's concern.
pub trait QuestionSource: Send + Sync {
    fn next_question(&self, theme: &str) -> Question;
}

// ── Builtin catalog ──────────────────────────────────────────────────────────

const FALLBACK_THEME: &str = "Pop";

const CATALOG: &[(&str, &[&str])] = &[
    ("Pop", &[
        "Shape of You",
        "Blinding Lights",
        "Bad Guy",
        "Uptown Funk",
        "Dance Monkey",
        "Someone Like You",
        "Levitating",
        "Don't Start Now",
    ]),
    ("Rap", &[
        "Lose Yourself",
        "God's Plan",
        "SICKO MODE",
        "In Da Club",
        "HUMBLE.",
        "Hotline Bling",
        "Dior",
        "Laugh Now Cry Later",
    ]),
    ("2000s", &[
        "Toxic",
        "Hey Ya!",
        "Crazy In Love",
        "Mr. Brightside",
        "I Gotta Feeling",
        "Hot N Cold",
        "Umbrella",
        "Since U Been Gone",
    ]),
];

/// Builtin source: picks a song from the requested theme, three distinct
/// wrong answers from the whole catalog, and shuffles the four options.
/// Unknown themes fall back to "Pop".
#[derive(Debug, Default)]
pub struct SongCatalog;

impl SongCatalog {
    pub fn new() -> Self {
        Self
    }

    pub fn themes() -> Vec<&'static str> {
        CATALOG.iter().map(|(theme, _)| *theme).collect()
    }

    fn theme_songs(theme: &str) -> &'static [&'static str] {
        CATALOG
            .iter()
            .find(|(t, _)| *t == theme)
            .or_else(|| CATALOG.iter().find(|(t, _)| *t == FALLBACK_THEME))
            .map(|(_, songs)| *songs)
            .unwrap_or(&[])
    }
}

impl QuestionSource for SongCatalog {
    fn next_question(&self, theme: &str) -> Question {
        let mut rng = rand::rng();

        let songs = Self::theme_songs(theme);
        let correct = songs.choose(&mut rng).copied().unwrap_or("Shape of You");

        let pool: Vec<&str> = CATALOG
            .iter()
            .flat_map(|(_, songs)| songs.iter().copied())
            .filter(|s| *s != correct)
            .collect();

        let mut answers: Vec<String> = pool
            .choose_multiple(&mut rng, 3)
            .map(|s| (*s).to_string())
            .collect();
        answers.push(correct.to_string());
        answers.shuffle(&mut rng);

        let slug = correct.to_lowercase().replace(' ', "_");
        Question {
            id: QuestionId::from(uuid::Uuid::new_v4().to_string()),
            audio_url: format!("/audio/{}/{slug}.mp3", theme.to_lowercase()),
            answers,
            correct_answer: correct.to_string(),
        }
    }
}
