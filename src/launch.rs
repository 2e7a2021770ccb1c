// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::path::PathBuf;
use std::process::Command;
use tracing::info;

/// Hands the finished image over for execution
pub trait Launcher: Send {
    fn launch(&mut self) -> std::io::Result<()>;
}

/// Runs `program <image>` when configured, otherwise just reports the image.
pub struct CommandLauncher {
    program: Option<PathBuf>,
    image: PathBuf,
}

impl CommandLauncher {
    pub fn new(program: Option<PathBuf>, image: PathBuf) -> Self {
        CommandLauncher { program, image }
    }
}

impl Launcher for CommandLauncher {
    fn launch(&mut self) -> std::io::Result<()> {
        let Some(program) = &self.program else {
            info!(image = %self.image.display(), "image ready");
            return Ok(());
        };

        info!(program = %program.display(), image = %self.image.display(), "launching image");
        let status = Command::new(program).arg(&self.image).status()?;
        if !status.success() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{} exited with {}", program.display(), status),
            ));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_without_program_is_a_no_op() {
        let mut launcher = CommandLauncher::new(None, PathBuf::from("NETLOAD.BIN"));
        assert!(launcher.launch().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_reports_failing_program() {
        let mut launcher = CommandLauncher::new(Some(PathBuf::from("false")), PathBuf::from("NETLOAD.BIN"));
        assert!(launcher.launch().is_err());
    }
}
