use crate::config::GeminiOptions;
use crate::error::GeminiError;

/// Translate options into CLI arguments.
///
/// The prompt is not part of the argument vector: it is delivered on stdin,
/// so it never has to survive `ARG_MAX` or any quoting.
pub fn build_args(options: &GeminiOptions) -> Result<Vec<String>, GeminiError> {
    options.validate()?;

    let mut args = vec![
        "-o".to_string(),
        options.output_format.as_cli_arg().to_string(),
    ];

    if let Some(model) = &options.model {
        args.push("-m".to_string());
        args.push(model.clone());
    }

    if options.sandbox {
        args.push("--sandbox".to_string());
    }

    if options.yolo {
        args.push("--yolo".to_string());
    }

    if let Some(resume) = &options.resume {
        args.push("--resume".to_string());
        args.push(resume.clone());
    }

    if !options.allowed_tools.is_empty() {
        args.push("--allowed-tools".to_string());
        args.push(
            options
                .allowed_tools
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(","),
        );
    }

    Ok(args)
}
