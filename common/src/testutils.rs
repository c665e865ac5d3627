pub async fn create_temp_dir() -> anyhow::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("ripup_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

/// Build a small disc-like tree of photos plus the index metadata a real
/// disc carries.
pub async fn setup_media_dir() -> anyhow::Result<std::path::PathBuf> {
    // create a temporary directory
    let tmp_dir = create_temp_dir().await?;
    // Pictures
    // |- IMG_0001.jpg
    // |- IMG_0002.jpg
    // |- index.html        <- disc index metadata, not a photo
    // |- thumbs
    //    |- IMG_0003.png
    //    |- PhotoIndex.db  <- excluded by the case-insensitive match
    let pictures = tmp_dir.join("Pictures");
    tokio::fs::create_dir(&pictures).await.unwrap();
    tokio::fs::write(pictures.join("IMG_0001.jpg"), "one")
        .await
        .unwrap();
    tokio::fs::write(pictures.join("IMG_0002.jpg"), "two")
        .await
        .unwrap();
    tokio::fs::write(pictures.join("index.html"), "<html></html>")
        .await
        .unwrap();
    let thumbs = pictures.join("thumbs");
    tokio::fs::create_dir(&thumbs).await.unwrap();
    tokio::fs::write(thumbs.join("IMG_0003.png"), "three")
        .await
        .unwrap();
    tokio::fs::write(thumbs.join("PhotoIndex.db"), "db")
        .await
        .unwrap();
    Ok(tmp_dir)
}

/// Pin a file's modification time to a wall-clock instant, so destination
/// names are predictable in tests.
pub fn pin_mtime(path: &std::path::Path, stamp: std::time::SystemTime) -> anyhow::Result<()> {
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(stamp))?;
    Ok(())
}

/// SystemTime for a local wall-clock instant; round-trips through the same
/// timezone the destination-name formatter uses.
pub fn local_time(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> std::time::SystemTime {
    use chrono::TimeZone;
    chrono::Local
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .expect("unambiguous local time")
        .into()
}
