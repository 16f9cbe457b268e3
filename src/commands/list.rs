use crate::error::{ErrorKind, Result};
use crate::services::Services;
use exn::ResultExt;
use offload_pipeline::inventory::{Inventory, inventory};

pub async fn run(services: &Services) -> Result<()> {
    let inventory = inventory(&services.ctx.repo).await.or_raise(|| ErrorKind::Command("list"))?;
    print!("{}", render(&inventory));
    Ok(())
}

fn render(inventory: &Inventory) -> String {
    let mut out = format!("Summary for {} images and {} sizes", inventory.attachments, inventory.sizes);
    if inventory.unparsable > 0 {
        out.push_str(&format!(" ({} unparsable)", inventory.unparsable));
    }
    out.push_str("\n\n");
    out.push_str(&format!(
        "{:<24} {:>8} {:>10} {:>10} {:>16} {:>12}\n",
        "Type", "Count", "Avg Width", "Avg Height", "Most Common Res", "Total Size"
    ));
    for (name, stats) in &inventory.by_size {
        let resolution = stats.most_common_resolution().map_or_else(|| "N/A".to_string(), |(w, h)| format!("{w}x{h}"));
        out.push_str(&format!(
            "{:<24} {:>8} {:>10} {:>10} {:>16} {:>12}\n",
            name,
            stats.count,
            stats.average_width(),
            stats.average_height(),
            resolution,
            format_bytes(stats.total_bytes)
        ));
    }
    out
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    match bytes {
        b if b >= MIB => format!("{:.2} MB", b as f64 / MIB as f64),
        b if b >= KIB => format!("{:.1} KB", b as f64 / KIB as f64),
        b => format!("{b} B"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_pipeline::inventory::SizeStats;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0 B")]
    #[case(1023, "1023 B")]
    #[case(1536, "1.5 KB")]
    #[case(5 * 1024 * 1024, "5.00 MB")]
    fn test_format_bytes(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(format_bytes(bytes), expected);
    }

    #[test]
    fn test_render() {
        let mut inventory = Inventory { attachments: 2, sizes: 2, unparsable: 1, ..Inventory::default() };
        let stats = SizeStats {
            count: 2,
            total_width: 300,
            total_height: 300,
            resolutions: [((150, 150), 2)].into(),
            total_bytes: 2048,
        };
        inventory.by_size.insert("thumbnail".to_string(), stats);

        let table = render(&inventory);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Summary for 2 images and 2 sizes (1 unparsable)");
        assert!(lines[2].starts_with("Type"));
        let row: Vec<&str> = lines[3].split_whitespace().collect();
        assert_eq!(row, ["thumbnail", "2", "150", "150", "150x150", "2.0", "KB"]);
    }
}
