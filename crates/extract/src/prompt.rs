pub fn build_extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"Extract a knowledge graph of entities and relationships from the following text.

INSTRUCTIONS:
1. Identify key entities (people, organizations, locations, concepts, events)
2. Extract relationships between the entities you identified
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "nodes": [
    {{"id": "Entity Name", "type": "Person|Organization|Location|Concept|Event"}}
  ],
  "relationships": [
    {{"source": "Entity Name", "target": "Other Entity", "type": "RELATIONSHIP_TYPE"}}
  ]
}}

RULES:
- Node ids are the entity names as written in the text, not numbers or codes
- Use the same id every time an entity is mentioned
- Relationship source and target must be node ids from the "nodes" list
- Relationship types are short, general verbs in UPPER_SNAKE_CASE: "WORKS_AT", "LEADS", "LOCATED_IN"
- Do not invent facts that are not stated in the text
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        chunk_text
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. It must have a "nodes" array and a "relationships" array. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_text() {
        let prompt = build_extraction_prompt("Alice works at Acme.");
        assert!(prompt.contains("TEXT:\nAlice works at Acme.\n"));
        assert!(prompt.contains(r#""relationships": ["#));
    }

    #[test]
    fn test_retry_prompt_embeds_response() {
        let prompt = build_retry_prompt("{\"nodes\": [");
        assert!(prompt.contains("{\"nodes\": ["));
    }
}
