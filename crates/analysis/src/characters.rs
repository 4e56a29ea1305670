use crate::aggregator::Aggregator;
use extract::{CharacterChunkResult, CharacterSighting};
use ingest::Chunk;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

const PROTAGONIST: &str = "protagonist";
const ANTAGONIST: &str = "antagonist";
const DEFAULT_ROLE: &str = "minor";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterProfile {
    pub name: String,
    pub role: String,
    pub traits: Vec<String>,
    pub relationships: Vec<String>,
    pub development_arc: String,
    pub scenes_appeared: usize,
}

impl CharacterProfile {
    fn from_sighting(sighting: CharacterSighting) -> Self {
        let mut profile = Self {
            name: sighting.name,
            role: sighting
                .role
                .filter(|role| !role.is_empty())
                .unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            traits: Vec::new(),
            relationships: Vec::new(),
            development_arc: String::new(),
            scenes_appeared: sighting.scenes_appeared_in_chunk,
        };
        union_into(&mut profile.traits, sighting.traits);
        union_into(&mut profile.relationships, sighting.relationships);
        if let Some(arc) = sighting.development_arc {
            profile.extend_arc(arc);
        }
        profile
    }

    fn merge(&mut self, sighting: CharacterSighting) {
        union_into(&mut self.traits, sighting.traits);
        union_into(&mut self.relationships, sighting.relationships);
        if let Some(arc) = sighting.development_arc {
            self.extend_arc(arc);
        }
        self.scenes_appeared += sighting.scenes_appeared_in_chunk;

        match sighting.role.as_deref() {
            Some(PROTAGONIST) => self.role = PROTAGONIST.to_string(),
            Some(ANTAGONIST) if self.role != PROTAGONIST => self.role = ANTAGONIST.to_string(),
            _ => {}
        }
    }

    fn extend_arc(&mut self, arc: String) {
        if arc.is_empty() || self.development_arc.contains(&arc) {
            return;
        }
        if self.development_arc.is_empty() {
            self.development_arc = arc;
        } else {
            self.development_arc.push_str("; ");
            self.development_arc.push_str(&arc);
        }
    }
}

fn union_into(existing: &mut Vec<String>, incoming: Vec<String>) {
    for item in incoming {
        if !existing.contains(&item) {
            existing.push(item);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CharacterAnalysis {
    pub characters: Vec<CharacterProfile>,
    pub main_characters: Vec<String>,
    pub supporting_characters: Vec<String>,
}

#[derive(Default)]
pub struct CharacterAggregator {
    characters: Vec<CharacterProfile>,
    by_name: HashMap<String, usize>,
    main: BTreeSet<String>,
    supporting: BTreeSet<String>,
}

impl CharacterAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for CharacterAggregator {
    type Partial = CharacterChunkResult;
    type Output = CharacterAnalysis;

    fn absorb(&mut self, _chunk: &Chunk, _total_chunks: usize, partial: CharacterChunkResult) {
        for sighting in partial.characters {
            if sighting.name.trim().is_empty() {
                continue;
            }
            match self.by_name.get(&sighting.name) {
                Some(&slot) => self.characters[slot].merge(sighting),
                None => {
                    self.by_name
                        .insert(sighting.name.clone(), self.characters.len());
                    self.characters.push(CharacterProfile::from_sighting(sighting));
                }
            }
        }

        self.main.extend(partial.main_characters);
        self.supporting.extend(partial.supporting_characters);
    }

    fn finish(self) -> CharacterAnalysis {
        CharacterAnalysis {
            characters: self.characters,
            main_characters: self.main.into_iter().collect(),
            supporting_characters: self.supporting.into_iter().collect(),
        }
    }
}
