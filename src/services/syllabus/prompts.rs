// Prompts and response schemas for syllabus analysis

use serde_json::{json, Value};

use super::types::TopicInput;

pub const DEFAULT_DIFFICULTY: &str = "Medium";
pub const DEFAULT_PROBLEM_COUNT: u32 = 3;

pub fn extract_topics_prompt(title: &str, content: &str) -> String {
    format!(
        "You are an expert educational analyst. Analyze the syllabus content and extract 20-25 important \
topics as JSON objects (do NOT include questions/answers at this stage).

Syllabus Title: {title}

Syllabus Content:
{content}

For each topic return:
- title (string)
- description (2-3 sentences)
- importance_score (0-1)
- marks_value (0-50)
- has_diagrams (boolean)
- key_points (array of 3-8 concise learning points)

Return only valid JSON matching this shape. Generate roughly 20-25 topics when possible."
    )
}

pub fn topics_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "topics": {
                "type": "array",
                "minItems": 1,
                "maxItems": 200,
                "items": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "description": {"type": "string"},
                        "importance_score": {"type": "number", "minimum": 0, "maximum": 1},
                        "marks_value": {"type": "number", "minimum": 0, "maximum": 50},
                        "has_diagrams": {"type": "boolean"},
                        "key_points": {"type": "array", "minItems": 3, "items": {"type": "string"}}
                    },
                    "required": ["title", "description", "importance_score", "marks_value", "has_diagrams", "key_points"]
                }
            },
            "connections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "topic_a_idx": {"type": "integer"},
                        "topic_b_idx": {"type": "integer"},
                        "relationship": {"type": "string"},
                        "strength": {"type": "number", "minimum": 0, "maximum": 1}
                    },
                    "required": ["topic_a_idx", "topic_b_idx", "relationship", "strength"]
                }
            }
        },
        "required": ["topics"]
    })
}

pub fn topic_answers_prompt(content: &str, topic: &TopicInput) -> String {
    format!(
        "You are an expert syllabus-driven educator. Based on the syllabus content and topic provided, \
generate 3-6 important exam-style questions with detailed answers.

Syllabus Content:
{content}

Topic:
Title: {}
Description: {}
Key Points: {}

Requirements:
- Generate 3-6 exam-style questions directly from the syllabus content
- Each answer should be 350-450 words
- Use short sub-headings and bullet points for readability
- Include optional unit_reference if the question relates to a specific section
- Only use information from the provided syllabus content
- Do not invent or add material outside the content

Return ONLY the JSON object with questions_answers array.",
        topic.title,
        topic.description,
        topic.key_points.join(", ")
    )
}

pub fn answers_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "questions_answers": {
                "type": "array",
                "minItems": 3,
                "maxItems": 6,
                "items": {
                    "type": "object",
                    "properties": {
                        "question": {"type": "string"},
                        "answer": {"type": "string"},
                        "unit_reference": {"type": "string"}
                    },
                    "required": ["question", "answer"]
                }
            }
        },
        "required": ["questions_answers"]
    })
}

pub fn coding_topics_prompt(content: &str) -> String {
    format!(
        "You are an expert computer science educator. Analyze the following syllabus content and extract \
3-10 distinct programming topics that would benefit from coding practice problems.

Syllabus Content:
{content}

Requirements:
- Extract topics that are practical and can be tested with C programming problems
- Each topic should be distinct and focused
- Provide clear descriptions and key learning points
- Assign appropriate difficulty levels
- Estimate how many coding problems (0-5) would be suitable for each topic
- Focus on topics like: data structures, algorithms, control flow, pointers, file handling, etc.

Generate a comprehensive list of topics that cover the syllabus content."
    )
}

pub fn coding_topics_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "topics": {
                "type": "array",
                "minItems": 3,
                "maxItems": 10,
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "title": {"type": "string"},
                        "description": {"type": "string"},
                        "key_points": {"type": "array", "items": {"type": "string"}},
                        "difficulty": {"type": "string", "enum": ["Easy", "Medium", "Hard"]},
                        "estimated_problems": {"type": "integer", "minimum": 0, "maximum": 5}
                    },
                    "required": ["id", "title", "description", "key_points", "difficulty", "estimated_problems"]
                }
            }
        },
        "required": ["topics"]
    })
}

pub fn coding_problems_prompt(topic: &TopicInput) -> String {
    let difficulty = topic
        .difficulty
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(DEFAULT_DIFFICULTY);
    let count = topic
        .estimated_problems
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_PROBLEM_COUNT);

    format!(
        "You are an expert computer science educator. Generate practical coding problems in C language \
for the following topic:

Topic: {}
Description: {}
Key Points: {}
Difficulty Level: {difficulty}

Requirements:
- Generate {count} coding problems directly related to this topic
- Each problem should test understanding of the key points
- Provide complete, runnable C code solutions with proper comments
- Include complexity analysis (time and space)
- Mark difficulty level appropriately (Easy/Medium/Hard)
- EXPLANATION FOCUS: In the explanation, focus ONLY on the important functions and how they are used
  * Name each important function (e.g., isSafe(), buildBoard(), etc.)
  * Explain what each important function does
  * Explain how and why each function is called
  * Do NOT explain variables, loops, or basic logic - only the important functions
  * Keep explanations concise and function-focused
- Identify the algorithm type (e.g., sorting, tree traversal, dynamic programming)
- Problems should be practical, educational, and progressively challenging

Generate coding problems that help students master this specific topic.",
        topic.title,
        topic.description,
        topic.key_points.join(", ")
    )
}

pub fn coding_problems_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "coding_problems": {
                "type": "array",
                "minItems": 1,
                "maxItems": 5,
                "items": {
                    "type": "object",
                    "properties": {
                        "problem_title": {"type": "string"},
                        "problem_statement": {"type": "string"},
                        "code_solution": {"type": "string"},
                        "explanation": {"type": "string"},
                        "algorithm_type": {"type": "string"},
                        "difficulty": {"type": "string", "enum": ["Easy", "Medium", "Hard"]},
                        "time_complexity": {"type": "string"},
                        "space_complexity": {"type": "string"},
                        "needs_diagram": {"type": "boolean"}
                    },
                    "required": ["problem_title", "problem_statement", "code_solution", "explanation"]
                }
            }
        },
        "required": ["coding_problems"]
    })
}
