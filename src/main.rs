// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod config;
mod overlays;
mod spots;

use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use airspace_overlay::{BoundingBox, LayerMask, OverlayCategory};
use clap::{Parser, Subcommand};
use log::info;

use config::{AppConfig, OverlaySourceConfig};
use spots::{HttpSpotsRemote, Spot, SpotCategory, SpotSync, SpotsRepository};

#[derive(Parser, Debug)]
#[command(name = "dronespots", version, about = "Drone spots with cached airspace overlays")]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List airspace overlays visible in a viewport
    Overlays {
        /// Viewport as min_lat,min_lon,max_lat,max_lon
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: BoundingBox,
        /// Map zoom level (defaults to the configured zoom)
        #[arg(long)]
        zoom: Option<f64>,
        /// Comma-separated categories (defaults to the configured layers)
        #[arg(long, value_parser = parse_layers)]
        layers: Option<LayerMask>,
        /// Extra GeoJSON file served as a local overlay source
        #[arg(long)]
        geojson: Option<PathBuf>,
    },
    /// Manage the local spot mirror
    Spots {
        #[command(subcommand)]
        command: SpotsCommands,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum SpotsCommands {
    /// Import spots from a CSV file
    Import { csv: PathBuf },
    /// List spots near a position (defaults to the home location)
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,
        #[arg(long)]
        radius_km: Option<f64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Add a spot to the local mirror
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value = "other")]
        category: SpotCategory,
        #[arg(long)]
        description: Option<String>,
    },
    /// Print one spot as JSON
    Show { id: String },
    /// Remove a spot from the local mirror
    Remove { id: String },
    /// List spots, optionally inside a viewport
    List {
        /// Viewport as min_lat,min_lon,max_lat,max_lon
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: Option<BoundingBox>,
    },
    /// Pull changes from the spots backend
    Sync {
        /// Keep syncing in the background until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Add a GeoJSON overlay source
    AddSource {
        #[arg(long)]
        name: String,
        /// URL with {min_lat} {min_lon} {max_lat} {max_lon} {layers} placeholders
        #[arg(long)]
        url: String,
        /// Comma-separated categories served by the feed
        #[arg(long, value_parser = parse_layers)]
        layers: LayerMask,
        /// GeoJSON property holding the category
        #[arg(long)]
        category_property: Option<String>,
        /// Environment variable holding the API key
        #[arg(long)]
        api_key_env: Option<String>,
    },
    /// Remove an overlay source by id
    RemoveSource { id: String },
}

fn parse_bbox(value: &str) -> Result<BoundingBox, String> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [min_lat, min_lon, max_lat, max_lon] => {
            BoundingBox::new(*min_lat, *min_lon, *max_lat, *max_lon).map_err(|e| e.to_string())
        }
        _ => Err("expected min_lat,min_lon,max_lat,max_lon".to_string()),
    }
}

fn parse_layers(value: &str) -> Result<LayerMask, String> {
    if value.trim().eq_ignore_ascii_case("all") {
        return Ok(LayerMask::all());
    }
    value
        .split(',')
        .filter(|p| !p.trim().is_empty())
        .map(str::parse::<OverlayCategory>)
        .collect()
}

fn spots_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dronespots")
        .join("spots.json")
}

async fn run_overlays(
    config: &AppConfig,
    bbox: &BoundingBox,
    zoom: Option<f64>,
    layers: Option<LayerMask>,
    geojson: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let cache_root = overlays::overlay_cache_dir();
    let store = overlays::build_store(config, geojson.as_deref(), cache_root.as_deref())?;
    let zoom = zoom.unwrap_or(config.default_zoom);
    let layers = layers.unwrap_or_else(|| config.layer_mask());

    info!("Querying overlays for {} at zoom {:.1} ({})", bbox, zoom, layers);
    let set = store.overlays(bbox, zoom, layers).await?;

    for feature in &set.features {
        println!("{}", overlays::describe_feature(feature));
    }
    println!("{}", overlays::describe_set(&set));
    Ok(())
}

async fn run_spots(config: &AppConfig, command: SpotsCommands) -> Result<(), Box<dyn Error>> {
    let path = spots_path();
    let mut repo = SpotsRepository::load(&path)?;

    match command {
        SpotsCommands::Import { csv } => {
            let changed = repo.import_csv(&csv)?;
            repo.save()?;
            println!("Imported {} spots ({} total)", changed, repo.len());
            if let Some(path) = repo.path() {
                println!("Saved to {}", path.display());
            }
        }
        SpotsCommands::Add {
            name,
            lat,
            lon,
            category,
            description,
        } => {
            let mut spot = Spot::new(name, lat, lon, category);
            if !spot.has_valid_position() {
                return Err(format!("position out of range: {lat}, {lon}").into());
            }
            if let Some(description) = description {
                spot = spot.with_description(description);
            }
            let id = spot.id.clone();
            repo.upsert(spot);
            repo.save()?;
            println!("Added spot {id}");
        }
        SpotsCommands::Show { id } => {
            let Some(spot) = repo.get(&id) else {
                return Err(format!("no spot with id {id}").into());
            };
            println!("{}", serde_json::to_string_pretty(spot)?);
        }
        SpotsCommands::Remove { id } => {
            if repo.remove(&id).is_none() {
                return Err(format!("no spot with id {id}").into());
            }
            repo.save()?;
            println!("Removed spot {id}");
        }
        SpotsCommands::List { bbox } => {
            let mut listed: Vec<&Spot> = match &bbox {
                Some(bbox) => repo.in_bounds(bbox),
                None => repo.iter().collect(),
            };
            listed.sort_by(|a, b| a.name.cmp(&b.name));
            for spot in &listed {
                println!(
                    "{:<36} {:<10} {:>9.5} {:>10.5}  {}",
                    spot.id, spot.category, spot.latitude, spot.longitude, spot.name
                );
            }
            if repo.is_empty() {
                println!("No spots yet, try `dronespots spots import` or `spots sync`");
            } else {
                println!("{} of {} spots", listed.len(), repo.len());
            }
        }
        SpotsCommands::Nearby {
            lat,
            lon,
            radius_km,
            limit,
        } => {
            let Some((lat, lon)) = lat.zip(lon).or_else(|| config.home_location()) else {
                return Err("no position given and no home location configured".into());
            };
            let radius_km = radius_km.unwrap_or(config.nearby_radius_km);
            let results = repo.nearby(lat, lon, radius_km, limit);
            for (spot, distance) in &results {
                println!("{:>7.2} km  {:<10} {}", distance, spot.category, spot.name);
            }
            println!("{} spots within {:.1} km", results.len(), radius_km);
        }
        SpotsCommands::Sync { watch } => {
            let Some(base_url) = config.spots_backend_url.clone() else {
                return Err("spots_backend_url is not configured".into());
            };
            let mut remote = HttpSpotsRemote::new(base_url);
            if let Some(key) = config.resolve_spots_api_key() {
                remote = remote.with_api_key(key);
            }

            let repo = Arc::new(Mutex::new(repo));
            if watch {
                let sync = SpotSync::spawn(Arc::clone(&repo), Arc::new(remote), config.sync_interval());
                let mut status = sync.subscribe();
                loop {
                    tokio::select! {
                        result = tokio::signal::ctrl_c() => {
                            result?;
                            break;
                        }
                        changed = status.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let current = status.borrow_and_update().clone();
                            match current.last_error {
                                Some(e) => println!("Sync failed: {e}"),
                                None => println!("Synced {} changed spots", current.changed),
                            }
                        }
                    }
                }
                sync.shutdown();
                info!("Stopped spot sync: {:?}", sync.status());
            } else {
                let changed = spots::sync_once(&repo, &remote).await?;
                println!("Synced {changed} changed spots");
            }
        }
    }

    Ok(())
}

fn run_config(mut config: AppConfig, command: ConfigCommands) -> Result<(), Box<dyn Error>> {
    match command {
        ConfigCommands::Path => println!("{}", AppConfig::get_config_path()?.display()),
        ConfigCommands::Show => println!("{config:#?}"),
        ConfigCommands::AddSource {
            name,
            url,
            layers,
            category_property,
            api_key_env,
        } => {
            if layers.is_empty() {
                return Err("at least one layer is required".into());
            }
            let mut source = OverlaySourceConfig::new(name, url, layers.iter().collect());
            source.category_property = category_property;
            source.api_key_env = api_key_env;
            let id = source.id.clone();
            config.add_source(source);
            config.save()?;
            if let Some(source) = config.get_source(&id) {
                println!("Added overlay source {} ({})", source.name, source.id);
            }
        }
        ConfigCommands::RemoveSource { id } => {
            if !config.remove_source(&id) {
                return Err(format!("no overlay source with id {id}").into());
            }
            config.save()?;
            println!("Removed overlay source {id}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = AppConfig::load()?;

    match cli.command {
        Commands::Overlays {
            bbox,
            zoom,
            layers,
            geojson,
        } => run_overlays(&config, &bbox, zoom, layers, geojson).await,
        Commands::Spots { command } => run_spots(&config, command).await,
        Commands::Config { command } => run_config(config, command),
    }
}
