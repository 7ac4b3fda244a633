//! Parsing of the predictor's console output and landmark files.

use super::PredictorError;

/// Marker the predictor prints before its consensus error.
pub const CONSENSUS_MARKER: &str = "Ransac average error";

/// Extracts the first consensus error reported in `output`.
pub fn parse_consensus_error(output: &str) -> Result<f64, PredictorError> {
    let start = output.find(CONSENSUS_MARKER).ok_or_else(|| {
        PredictorError::MalformedOutput(format!("no '{}' line in output", CONSENSUS_MARKER))
    })?;

    let rest = &output[start + CONSENSUS_MARKER.len()..];
    let rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ':');
    let number: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'))
        .collect();

    number.parse::<f64>().map_err(|_| {
        PredictorError::MalformedOutput(format!("cannot parse consensus error '{}'", number))
    })
}

/// Reads `x y z` lines; lines with any other number of fields are skipped.
pub fn parse_landmarks(text: &str) -> Result<Vec<[f64; 3]>, PredictorError> {
    let mut landmarks = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            continue;
        }
        let mut point = [0.0f64; 3];
        for (slot, part) in point.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                PredictorError::MalformedOutput(format!(
                    "landmark line {}: cannot parse '{}'",
                    line_no + 1,
                    part
                ))
            })?;
        }
        landmarks.push(point);
    }
    Ok(landmarks)
}

/// One `x y z` line per landmark, readable by [`parse_landmarks`].
pub fn format_landmarks(landmarks: &[[f64; 3]]) -> String {
    landmarks
        .iter()
        .map(|[x, y, z]| format!("{} {} {}\n", x, y, z))
        .collect()
}

/// Last `max_chars` characters of `output`, for error messages.
pub fn output_tail(output: &str, max_chars: usize) -> String {
    let count = output.chars().count();
    output.chars().skip(count.saturating_sub(max_chars)).collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_consensus_error() {
        let output = "Loading model\nRendering 96 views\nRansac average error  3.4172 over 73 landmarks\nRansac average error 9.0\n";
        assert_eq!(parse_consensus_error(output).unwrap(), 3.4172);
        assert_eq!(parse_consensus_error("Ransac average error: 1.5e2").unwrap(), 150.0);
    }

    #[test]
    fn test_missing_consensus_error() {
        assert!(matches!(
            parse_consensus_error("CUDA out of memory"),
            Err(PredictorError::MalformedOutput(_))
        ));
        assert!(parse_consensus_error("Ransac average error nan").is_err());
    }

    #[test]
    fn test_parse_landmarks_skips_other_lines() {
        let text = "# landmarks\n1.0 2.0 3.0\n\n-4 5.5 6e-1\n7 8\n";
        let landmarks = parse_landmarks(text).unwrap();
        assert_eq!(landmarks, vec![[1.0, 2.0, 3.0], [-4.0, 5.5, 0.6]]);
    }

    #[test]
    fn test_formatted_landmarks_parse_back() {
        let landmarks = vec![[0.125, -3.0, 1e-7], [12.5, 0.0, 99.0]];
        let text = format_landmarks(&landmarks);
        assert_eq!(text.lines().count(), 2);
        assert_eq!(parse_landmarks(&text).unwrap(), landmarks);
    }

    #[test]
    fn test_parse_landmarks_rejects_garbage_triplets() {
        assert!(parse_landmarks("1.0 two 3.0\n").is_err());
    }

    #[test]
    fn test_output_tail() {
        assert_eq!(output_tail("abcdef", 3), "def");
        assert_eq!(output_tail("ab", 10), "ab");
    }
}
