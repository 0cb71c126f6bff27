//! Image builds with `docker`.

use std::path::Path;

use super::process::ToolCommand;
use crate::config::ImageConfig;

pub fn build_command(program: &str, project_dir: &Path, image: &ImageConfig) -> ToolCommand {
    let mut cmd = ToolCommand::new(program, project_dir).args(["build", "-t", image.image.as_str()]);
    if let Some(dockerfile) = &image.dockerfile {
        cmd = cmd.arg("-f").arg(project_dir.join(dockerfile).display().to_string());
    }
    cmd.arg(project_dir.join(&image.context).display().to_string())
}
