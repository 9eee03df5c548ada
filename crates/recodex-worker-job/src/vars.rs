//! `${VAR}` substitution for job config strings (the job-scoped variables
//! named in spec.md §4.4: `WORKER_ID`, `JOB_ID`, `SOURCE_DIR`, `RESULT_DIR`,
//! `EVAL_DIR`, `TEMP_DIR`, `JUDGES_DIR`), grounded on
//! `original_source/src/job/job.cpp`'s `parse_job_var`.

use anyhow::{bail, Result};

/// Replaces every `${NAME}` occurrence found in `vars` with its value;
/// `${NAME}` for an unrecognized `NAME` is left untouched, matching the
/// original's lookup-and-skip behavior.
pub fn substitute(src: &str, vars: &[(String, String)]) -> Result<String> {
    let mut res = src.to_string();
    let mut start = 0usize;

    while let Some(rel) = res[start..].find("${") {
        let begin = start + rel;
        let name_start = begin + 2;
        let end = match res[name_start..].find('}') {
            Some(rel_end) => name_start + rel_end,
            None => bail!("not closed variable name: {}", &res[begin..]),
        };
        let name = &res[name_start..end][..];

        if let Some((_, value)) = vars.iter().find(|(k, _)| k == name) {
            let value = value.clone();
            res.replace_range(begin..=end, &value);
        }

        start = (begin + 1).min(res.len());
    }

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_known_variables() {
        let vars = vec![
            ("JOB_ID".to_string(), "job-42".to_string()),
            ("SOURCE_DIR".to_string(), "/src".to_string()),
        ];
        let out = substitute("${SOURCE_DIR}/job-${JOB_ID}.tar", &vars).unwrap();
        assert_eq!(out, "/src/job-job-42.tar");
    }

    #[test]
    fn leaves_unknown_variables_untouched() {
        let out = substitute("prefix-${NOT_A_VAR}-suffix", &[]).unwrap();
        assert_eq!(out, "prefix-${NOT_A_VAR}-suffix");
    }

    #[test]
    fn rejects_unclosed_variable() {
        assert!(substitute("broken ${JOB_ID", &[]).is_err());
    }
}
