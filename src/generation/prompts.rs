//! Prompt templates sent to the generation service.

use crate::workspace::{FileContent, FileSet};

pub const SYSTEM_PROMPT: &str = r#"You are an expert React Native developer. Generate a complete, working React Native application that builds for Android with `./gradlew assembleRelease`.

Write clean, well-structured code with proper error handling and a responsive layout.

Return ONLY a JSON object with exactly this structure:
{
  "files": {
    "App.js": "<complete source>",
    "package.json": "<complete package.json>",
    "<any other project-relative path>": "<complete contents>"
  },
  "appName": "<short application name>",
  "requirements": ["<npm dependency>", "..."]
}

Every file path must be relative to the project root. Do not write any explanation outside the JSON object."#;

pub fn generation_prompt(requirements: &str) -> String {
    format!(
        "Generate a React Native app with the following requirements: {}",
        requirements
    )
}

/// Ask for a corrected project. `build_output` should already be trimmed
/// to the part worth sending.
pub fn fix_prompt(original_prompt: &str, build_output: &str) -> String {
    format!(
        "The previously generated React Native app failed to build with the following error:\n\
         {}\n\n\
         Original app requirements:\n\
         {}\n\n\
         Generate a fixed version of the app that resolves these build errors. \
         Return the complete corrected project in the same JSON format.",
        build_output, original_prompt
    )
}

pub fn security_prompt(file_set: &FileSet) -> String {
    let mut prompt = String::from(
        "Review the following React Native project for security issues.\n\n",
    );
    for (path, content) in file_set.iter() {
        prompt.push_str(&format!("--- {} ---\n", path));
        match content {
            FileContent::Text(text) => prompt.push_str(text),
            FileContent::Binary(bytes) => {
                prompt.push_str(&format!("(binary file, {} bytes)", bytes.len()))
            }
        }
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "Identify any:\n\
         1. Potential security vulnerabilities or unsafe code patterns\n\
         2. Unsafe data handling\n\
         3. Insecure or suspicious dependencies\n\
         4. Privacy-sensitive operations\n\n\
         Return ONLY the word SAFE if no issues are found, or a JSON array of issue descriptions if any are found.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_prompt_embeds_requirements() {
        let prompt = generation_prompt("a calculator with dark theme");
        assert!(prompt.ends_with("a calculator with dark theme"));
    }

    #[test]
    fn test_fix_prompt_contains_error_and_original() {
        let prompt = fix_prompt("a todo list", "error: cannot find symbol");
        assert!(prompt.contains("error: cannot find symbol"));
        assert!(prompt.contains("a todo list"));
        assert!(prompt.find("cannot find symbol") < prompt.find("a todo list"));
    }

    #[test]
    fn test_security_prompt_lists_every_file() {
        let mut set = FileSet::new();
        set.insert("App.js", "fetch('http://tracker')");
        set.insert("logo.png", FileContent::Binary(vec![1, 2, 3]));
        let prompt = security_prompt(&set);
        assert!(prompt.contains("--- App.js ---\nfetch('http://tracker')"));
        assert!(prompt.contains("(binary file, 3 bytes)"));
        assert!(prompt.contains("SAFE"));
    }
}
