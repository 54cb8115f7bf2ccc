//! Pre-authored romantic translations used when generation is unavailable.

const PHRASES: &[(&str, &str)] = &[
    (
        "i like you",
        "Me gustas más que el café por la mañana, y eso es decir MUCHO",
    ),
    (
        "you're beautiful",
        "Eres más bella que un amanecer sobre las montañas de Oaxaca",
    ),
    ("i love you", "Te amo con la intensidad de mil soles ardientes"),
    ("i miss you", "Sin ti, mi corazón es un jardín sin flores"),
];

/// Exact, case-insensitive lookup. Surrounding whitespace is ignored.
pub fn lookup(text: &str) -> Option<&'static str> {
    let key = text.trim().to_lowercase();
    PHRASES
        .iter()
        .find(|(phrase, _)| *phrase == key)
        .map(|(_, translation)| *translation)
}

/// Phrasebook entry for `text`, or the generic template embedding it.
pub fn fallback(text: &str) -> String {
    match lookup(text) {
        Some(translation) => translation.to_string(),
        None => format!("Mi corazón late por ti cuando dices: {}", text),
    }
}
