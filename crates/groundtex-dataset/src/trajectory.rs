//! Trajectory files.
//!
//! One waypoint per line, `x,y,yaw` in metres and radians:
//!
//! ```text
//! 0.0,0.0,0.0
//! 1.0,0.0,1.5707963
//! "1.0", "1.0", "3.1415926"
//! ```
//!
//! Fields are trimmed and may be wrapped in double quotes.  Blank lines are
//! skipped.  Columns past the third are ignored with a warning.  A line with
//! fewer than three columns, or a field that is not a number, rejects the
//! whole file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use groundtex_types::Pose2D;
use tracing::{debug, warn};

use crate::DatasetError;

/// Read a trajectory from `path`.
pub fn load_trajectory(path: impl AsRef<Path>) -> Result<Vec<Pose2D>, DatasetError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
    let poses = parse_trajectory(BufReader::new(file)).map_err(|e| match e {
        DatasetError::Io { source, .. } => DatasetError::io(path, source),
        other => other,
    })?;
    debug!(path = %path.display(), waypoints = poses.len(), "trajectory loaded");
    Ok(poses)
}

/// Parse trajectory lines from any buffered reader.
pub fn parse_trajectory(reader: impl BufRead) -> Result<Vec<Pose2D>, DatasetError> {
    let mut poses = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line_number = i + 1;
        let line = line.map_err(|e| DatasetError::io("<trajectory>", e))?;
        if line.trim().is_empty() {
            continue;
        }
        poses.push(parse_line(line_number, &line)?);
    }
    Ok(poses)
}

fn parse_line(line_number: usize, line: &str) -> Result<Pose2D, DatasetError> {
    let fields: Vec<&str> = line.split(',').map(clean_field).collect();
    let fail = |reason: String| DatasetError::Parse {
        line_number,
        line: line.to_string(),
        reason,
    };

    if fields.len() < 3 {
        return Err(fail(format!("expected 3 columns, found {}", fields.len())));
    }
    if fields.len() > 3 {
        warn!(
            line_number,
            columns = fields.len(),
            "extra trajectory columns ignored"
        );
    }

    let mut values = [0.0f64; 3];
    for (value, (name, field)) in values
        .iter_mut()
        .zip(["x", "y", "yaw"].into_iter().zip(&fields))
    {
        *value = field
            .parse()
            .map_err(|_| fail(format!("{name} value {field:?} is not a number")))?;
    }
    Ok(Pose2D::new(values[0], values[1], values[2]))
}

fn clean_field(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .map(str::trim)
        .unwrap_or(field)
}
