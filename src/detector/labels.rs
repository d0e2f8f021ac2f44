use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// A class entry: human-readable name plus the color its boxes are drawn in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabel {
    pub label: String,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// Load the class label table from a `name,r,g,b` file. The table is fixed
/// for the lifetime of the loaded model; the line index is the class id.
pub fn load_class_labels(filepath: &Path) -> io::Result<Vec<ClassLabel>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut class_labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        class_labels.push(parse_label_line(&line)?);
    }

    Ok(class_labels)
}

fn parse_label_line(line: &str) -> io::Result<ClassLabel> {
    let parts: Vec<&str> = line.split(',').collect();

    if parts.len() != 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid line format: {}", line),
        ));
    }

    let label = parts[0].trim().to_string();
    let red: u8 = parts[1]
        .trim()
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid red value"))?;
    let green: u8 = parts[2]
        .trim()
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid green value"))?;
    let blue: u8 = parts[3]
        .trim()
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid blue value"))?;

    Ok(ClassLabel {
        label,
        red,
        green,
        blue,
    })
}
