use std::env;
use std::error::Error;
use std::path::PathBuf;

use dicom_viewport::{
    IntensityTransformer, Orientation, ProjectionMode, ViewerConfig, VolumeLoader, WindowLevel,
};
use log::{info, warn};

const USAGE: &str = "usage: dicom-viewport <dicom-dir> [config.json]";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .try_init();

    let mut args = env::args().skip(1);
    let dir = PathBuf::from(args.next().ok_or(USAGE)?);
    let config = match args.next() {
        Some(path) => ViewerConfig::from_path(path)?,
        None => ViewerConfig::default(),
    };

    let sort_by = config.sort_by;
    let loaded =
        tokio::task::spawn_blocking(move || VolumeLoader::load_from_directory(dir, sort_by))
            .await??;
    for warning in &loaded.warnings {
        warn!("{warning:?}");
    }
    let volume = loaded.volume;

    let (min, max) = volume.value_range().ok_or("volume is empty")?;
    let transformer =
        IntensityTransformer::for_hu(WindowLevel::from_range(min as f64, max as f64), false);
    let (width, height, depth) = volume.dims_xyz();

    for (orientation, index, name) in [
        (Orientation::Axial, depth / 2, "axial.png"),
        (Orientation::Coronal, height / 2, "coronal.png"),
        (Orientation::Sagittal, width / 2, "sagittal.png"),
    ] {
        let image = volume
            .get_image_from_axis(index, orientation, config.mpr_interpolation, &transformer)
            .ok_or("empty plane")?;
        image.save(name)?;
        info!("Wrote {name}");
    }

    let mip = volume.project(Orientation::Axial, ProjectionMode::Maximum);
    transformer
        .render_hu(mip.view())
        .ok_or("empty projection")?
        .save("mip.png")?;
    info!("Wrote mip.png");
    Ok(())
}
