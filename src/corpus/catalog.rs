//! The fixed catalog of (genre, instrument) generation units.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    Rock,
    Pop,
    Jazz,
    Classical,
    Country,
    Electronic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Guitar,
    Bass,
    Drums,
    Piano,
    Synth,
    Saxophone,
    Trumpet,
    Violin,
    Cello,
    Flute,
    Banjo,
    Fiddle,
}

impl Genre {
    pub const ALL: [Genre; 6] = [
        Genre::Rock,
        Genre::Pop,
        Genre::Jazz,
        Genre::Classical,
        Genre::Country,
        Genre::Electronic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Rock => "rock",
            Genre::Pop => "pop",
            Genre::Jazz => "jazz",
            Genre::Classical => "classical",
            Genre::Country => "country",
            Genre::Electronic => "electronic",
        }
    }

    /// Instruments this genre has a model for.
    pub fn instruments(&self) -> &'static [Instrument] {
        use Instrument::*;
        match self {
            Genre::Rock => &[Guitar, Bass, Drums, Piano],
            Genre::Pop => &[Piano, Synth, Guitar, Drums],
            Genre::Jazz => &[Piano, Saxophone, Bass, Drums, Trumpet],
            Genre::Classical => &[Piano, Violin, Cello, Flute],
            Genre::Country => &[Guitar, Banjo, Fiddle, Bass],
            Genre::Electronic => &[Synth, Drums, Bass],
        }
    }
}

impl Instrument {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Guitar => "guitar",
            Instrument::Bass => "bass",
            Instrument::Drums => "drums",
            Instrument::Piano => "piano",
            Instrument::Synth => "synth",
            Instrument::Saxophone => "saxophone",
            Instrument::Trumpet => "trumpet",
            Instrument::Violin => "violin",
            Instrument::Cello => "cello",
            Instrument::Flute => "flute",
            Instrument::Banjo => "banjo",
            Instrument::Fiddle => "fiddle",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Genre {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Genre::ALL
            .iter()
            .copied()
            .find(|genre| genre.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown genre '{}'", s))
    }
}

/// One (genre, instrument) combination with its own model and track pool.
///
/// Can only be built for instruments the genre actually owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationUnit {
    genre: Genre,
    instrument: Instrument,
}

impl GenerationUnit {
    pub fn new(genre: Genre, instrument: Instrument) -> Option<Self> {
        genre
            .instruments()
            .contains(&instrument)
            .then_some(Self { genre, instrument })
    }

    pub fn genre(&self) -> Genre {
        self.genre
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    /// `<genre>_<instrument>`, the name used for every per-unit path.
    pub fn key(&self) -> String {
        format!("{}_{}", self.genre.as_str(), self.instrument.as_str())
    }
}

impl fmt::Display for GenerationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.genre, self.instrument)
    }
}

/// Ordered, de-duplicated set of generation units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCatalog {
    units: Vec<GenerationUnit>,
}

impl UnitCatalog {
    pub fn builtin() -> Self {
        let units = Genre::ALL
            .iter()
            .flat_map(|genre| {
                genre
                    .instruments()
                    .iter()
                    .map(move |instrument| GenerationUnit {
                        genre: *genre,
                        instrument: *instrument,
                    })
            })
            .collect();
        Self { units }
    }

    pub fn from_units(units: impl IntoIterator<Item = GenerationUnit>) -> Self {
        let mut deduped: Vec<GenerationUnit> = Vec::new();
        for unit in units {
            if !deduped.contains(&unit) {
                deduped.push(unit);
            }
        }
        Self { units: deduped }
    }

    /// Keeps only the units whose genre is listed.
    pub fn restricted_to(&self, genres: &[Genre]) -> Self {
        Self {
            units: self
                .units
                .iter()
                .filter(|unit| genres.contains(&unit.genre))
                .copied()
                .collect(),
        }
    }

    pub fn units(&self) -> &[GenerationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_requires_instrument_owned_by_genre() {
        assert!(GenerationUnit::new(Genre::Rock, Instrument::Drums).is_some());
        assert!(GenerationUnit::new(Genre::Classical, Instrument::Drums).is_none());
        assert!(GenerationUnit::new(Genre::Country, Instrument::Banjo).is_some());
    }

    #[test]
    fn key_is_lowercase_genre_underscore_instrument() {
        let unit = GenerationUnit::new(Genre::Electronic, Instrument::Synth).unwrap();
        assert_eq!(unit.key(), "electronic_synth");
        assert_eq!(unit.to_string(), "electronic_synth");
    }

    #[test]
    fn builtin_catalog_covers_every_genre_instrument_pair() {
        let catalog = UnitCatalog::builtin();
        let expected: usize = Genre::ALL.iter().map(|g| g.instruments().len()).sum();

        assert_eq!(catalog.len(), expected);
        assert_eq!(catalog.len(), 24);
        for unit in catalog.units() {
            assert!(unit.genre().instruments().contains(&unit.instrument()));
        }
    }

    #[test]
    fn from_units_removes_duplicates_keeping_order() {
        let drums = GenerationUnit::new(Genre::Rock, Instrument::Drums).unwrap();
        let piano = GenerationUnit::new(Genre::Jazz, Instrument::Piano).unwrap();

        let catalog = UnitCatalog::from_units([drums, piano, drums]);

        assert_eq!(catalog.units(), &[drums, piano]);
    }

    #[test]
    fn restricted_catalog_keeps_only_listed_genres() {
        let catalog = UnitCatalog::builtin().restricted_to(&[Genre::Country]);

        assert_eq!(catalog.len(), 4);
        assert!(catalog.units().iter().all(|u| u.genre() == Genre::Country));
    }

    #[test]
    fn genre_parsing() {
        assert_eq!("Jazz".parse::<Genre>().unwrap(), Genre::Jazz);
        assert_eq!(" rock ".parse::<Genre>().unwrap(), Genre::Rock);
        assert!("polka".parse::<Genre>().is_err());
    }
}
