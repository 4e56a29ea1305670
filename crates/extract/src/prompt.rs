use crate::schema::AnalysisKind;

/// Build the instruction payload for one chunk.
///
/// `chunk_index` is 0-based; the payload speaks in 1-based ordinals.
pub fn build_analysis_prompt(
    kind: AnalysisKind,
    chunk_index: usize,
    total_chunks: usize,
    chunk_text: &str,
) -> String {
    let number = chunk_index + 1;

    match kind {
        AnalysisKind::PovDistribution => build_pov_prompt(number, total_chunks, chunk_text),
        AnalysisKind::CharacterAnalysis => {
            build_character_prompt(number, total_chunks, chunk_text)
        }
        AnalysisKind::Pacing => build_pacing_prompt(number, total_chunks, chunk_text),
        AnalysisKind::Consistency => build_consistency_prompt(number, total_chunks, chunk_text),
    }
}

fn chunk_word_count(chunk_text: &str) -> usize {
    chunk_text.split_whitespace().count()
}

fn build_pov_prompt(number: usize, total: usize, chunk_text: &str) -> String {
    format!(
        r#"Analyze this manuscript text chunk ({number}/{total}) for Point of View (POV) distribution.

IMPORTANT: This is chunk {number} of {total}. Character positions must be relative to the start of this chunk, which is position 0.

Identify:
1. POV character segments in this chunk
2. Character names and POV switches
3. Word count and position for each segment within this chunk
4. Confidence level (0-1)
5. Chapter/section markers if present

Text to analyze (chunk {number}/{total}):
{chunk_text}

Return a JSON object with this structure:
{{
  "segments": [
    {{
      "character": "Character Name",
      "startPosition": 0,
      "endPosition": 1500,
      "wordCount": 750,
      "confidence": 0.95,
      "chapter": "Chapter X",
      "section": "Section name",
      "text_snippet": "First 100 characters of the segment..."
    }}
  ],
  "chunk_info": {{
    "chunk_number": {number},
    "total_chunks": {total},
    "chunk_words": {words}
  }}
}}

Field types: character (string), startPosition/endPosition/wordCount (integers), confidence (number between 0 and 1), chapter/section (string or null), text_snippet (string).
Focus on POV shifts, character thoughts/internal dialogue, and narrative perspective changes in this chunk."#,
        words = chunk_word_count(chunk_text),
    )
}

fn build_character_prompt(number: usize, total: usize, chunk_text: &str) -> String {
    format!(
        r#"Analyze this manuscript text chunk ({number}/{total}) to identify and categorize characters.

IMPORTANT: This is chunk {number} of {total}. Focus on characters that appear in this specific chunk. Any positions you mention are relative to the start of this chunk (position 0).

Identify:
1. All named characters in this chunk
2. Their apparent roles
3. Key traits and personality
4. Relationships with other characters
5. Development/growth shown in this chunk
6. Significance level in this chunk

Text to analyze (chunk {number}/{total}):
{chunk_text}

Return a JSON object with this structure:
{{
  "characters": [
    {{
      "name": "Character Name",
      "role": "protagonist|antagonist|supporting|minor",
      "traits": ["brave", "determined"],
      "relationships": ["friend of X", "rival of Y"],
      "development_arc": "Growth shown in this chunk",
      "scenes_appeared_in_chunk": 3,
      "significance": "major|moderate|minor"
    }}
  ],
  "main_characters": ["Characters with major presence in this chunk"],
  "supporting_characters": ["Characters with moderate presence"]
}}

Field types: name/role/development_arc/significance (strings), traits/relationships (arrays of strings), scenes_appeared_in_chunk (integer), main_characters/supporting_characters (arrays of names).
Focus on characters with dialogue, actions, or significant mentions."#
    )
}

fn build_pacing_prompt(number: usize, total: usize, chunk_text: &str) -> String {
    format!(
        r#"Analyze the pacing and narrative flow of this manuscript chunk ({number}/{total}).

IMPORTANT: This is chunk {number} of {total}. Analyze pacing within this specific section. Any positions you mention are relative to the start of this chunk (position 0).

Identify:
1. Action vs. dialogue vs. description ratios in this chunk (the three percentages should add up to about 100)
2. Scene transitions and chapter breaks
3. Tension levels and changes
4. Pacing issues (too fast/slow sections)
5. Key momentum points

Text to analyze (chunk {number}/{total}):
{chunk_text}

Return a JSON object with this structure:
{{
  "chunk_metrics": {{
    "chunk_number": {number},
    "word_count": {words},
    "action_percentage": 30,
    "dialogue_percentage": 40,
    "description_percentage": 30,
    "average_tension": 6,
    "tension_changes": ["low to high at scene break", "sustained high tension"]
  }},
  "pacing_notes": ["Fast-paced action sequence", "Slow exposition section"],
  "momentum_points": ["Chapter climax", "Plot revelation"],
  "issues": ["Too much exposition in middle", "Abrupt scene transition"]
}}

Field types: percentages and average_tension (numbers), every list (array of strings).
Focus on narrative flow, tension patterns, and pacing effectiveness."#,
        words = chunk_word_count(chunk_text),
    )
}

fn build_consistency_prompt(number: usize, total: usize, chunk_text: &str) -> String {
    format!(
        r#"Analyze this manuscript chunk ({number}/{total}) for consistency issues.

IMPORTANT: This is chunk {number} of {total}. Look for issues within this chunk and note patterns. Any locations you give are relative to the start of this chunk (position 0).

Look for:
1. Character name variations or inconsistencies
2. Timeline or chronological issues
3. Description contradictions
4. Plot holes or logical inconsistencies
5. Continuity errors within this chunk

Text to analyze (chunk {number}/{total}):
{chunk_text}

Return a JSON object with this structure:
{{
  "character_names": ["List all character names mentioned"],
  "issues": [
    {{
      "type": "character|timeline|description|plot|continuity",
      "severity": "minor|moderate|major",
      "description": "Brief description of the issue",
      "location": "Approximate location in chunk",
      "suggestion": "How to fix it"
    }}
  ],
  "timeline_events": [
    {{
      "event": "What happened",
      "when": "Time reference",
      "location": "Where in chunk"
    }}
  ],
  "chunk_summary": "Brief summary of this chunk's content"
}}

Field types: every field is a string; severity must be exactly one of minor, moderate, major.
Focus on identifying actual inconsistencies, not stylistic preferences."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Alice said hi. Bob said bye.";

    #[test]
    fn test_prompts_state_position_and_embed_text() {
        for kind in AnalysisKind::ALL {
            let prompt = build_analysis_prompt(kind, 1, 3, TEXT);

            assert!(prompt.contains("chunk 2 of 3"), "{kind}: missing ordinal");
            assert!(prompt.contains("(chunk 2/3):\nAlice said hi. Bob said bye.\n"), "{kind}: text not verbatim");
            assert!(prompt.contains("position 0"), "{kind}: missing relative-position rule");
        }
    }

    #[test]
    fn test_pov_prompt_describes_segment_shape() {
        let prompt = build_analysis_prompt(AnalysisKind::PovDistribution, 0, 1, TEXT);

        for field in ["\"segments\"", "\"startPosition\"", "\"endPosition\"", "\"wordCount\"", "\"confidence\"", "\"text_snippet\""] {
            assert!(prompt.contains(field), "missing {field}");
        }
        assert!(prompt.contains("\"chunk_words\": 6"));
    }

    #[test]
    fn test_shapes_are_kind_specific() {
        let characters = build_analysis_prompt(AnalysisKind::CharacterAnalysis, 0, 1, TEXT);
        assert!(characters.contains("\"main_characters\""));
        assert!(characters.contains("\"scenes_appeared_in_chunk\""));

        let pacing = build_analysis_prompt(AnalysisKind::Pacing, 0, 1, TEXT);
        assert!(pacing.contains("\"dialogue_percentage\""));
        assert!(pacing.contains("\"momentum_points\""));

        let consistency = build_analysis_prompt(AnalysisKind::Consistency, 0, 1, TEXT);
        assert!(consistency.contains("minor|moderate|major"));
        assert!(consistency.contains("\"timeline_events\""));
    }

    #[test]
    fn test_example_shapes_are_valid_json() {
        // The example payload embedded in each prompt must itself be extractable
        for kind in AnalysisKind::ALL {
            let prompt = build_analysis_prompt(kind, 0, 1, "plain words without braces");
            let schema_start = prompt.find("structure:\n").unwrap();
            let value = crate::json::extract_structured(&prompt[schema_start..]).unwrap();
            assert!(value.is_object(), "{kind}");
        }
    }
}
