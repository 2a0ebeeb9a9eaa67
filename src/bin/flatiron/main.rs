//! Flatiron CLI - cone metric optimization command-line tool.
//!
//! Usage: flatiron <COMMAND> [OPTIONS]
//!
//! Run `flatiron --help` for available commands.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use flatiron::cones;
use flatiron::energy::{generate_energy, EnergyChoice};
use flatiron::io;
use flatiron::metric::{initial_cone_metric, ConeMetric, MetricMode};
use flatiron::optimize::{
    compute_optimization_domain, compute_shear_basis, optimize_metric, sample_energy_grid,
    DirectionChoice, GridOptions, OptimizationParameters, ProjectionParameters,
};

#[derive(Parser)]
#[command(name = "flatiron")]
#[command(author, version, about = "Cone metric optimization in Penner coordinates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize a metric for prescribed cone angles
    Optimize {
        /// Input mesh file (OBJ)
        #[arg(long)]
        mesh: PathBuf,

        /// Cone angle file (one angle per vertex)
        #[arg(long)]
        cones: PathBuf,

        /// Energy to minimize
        #[arg(long, value_enum, default_value = "log-length")]
        energy: EnergyArg,

        /// Exponent for the p-norm energy
        #[arg(long, default_value = "2.0")]
        power: f64,

        /// Descent direction
        #[arg(long, value_enum, default_value = "projected-gradient")]
        direction: DirectionArg,

        /// Maximum number of iterations to perform
        #[arg(long, default_value = "200")]
        num_iter: usize,

        /// Use edge lengths instead of Penner coordinates
        #[arg(long)]
        use_discrete_metric: bool,

        /// Let cones have free angles
        #[arg(long)]
        use_free_cones: bool,

        /// Output directory
        #[arg(short, long, default_value = "./")]
        output: PathBuf,
    },

    /// Sample the energy over a 2-D grid of shear coordinates
    PlotEnergy {
        /// Input mesh file (OBJ)
        #[arg(long)]
        mesh: PathBuf,

        /// Cone angle file (one angle per vertex)
        #[arg(long)]
        cones: PathBuf,

        /// Energy to sample
        #[arg(long, value_enum, default_value = "log-length")]
        energy: EnergyArg,

        /// Exponent for the p-norm energy
        #[arg(long, default_value = "2.0")]
        power: f64,

        /// Half-width of the sampled square around the initial metric
        #[arg(long, default_value = "1.0")]
        range: f64,

        /// Number of grid samples per axis
        #[arg(long, default_value = "800")]
        num_steps: usize,

        /// Output directory
        #[arg(short, long, default_value = "./")]
        output: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum EnergyArg {
    /// Squared change of log edge lengths
    LogLength,
    /// Squared best-fit log scale factors
    LogScale,
    /// Quadratic symmetric Dirichlet energy
    QuadraticSymDirichlet,
    /// Full symmetric Dirichlet energy
    SymDirichlet,
    /// Lp norm of per-triangle distortion
    PNorm,
}

impl EnergyArg {
    fn to_choice(self, power: f64) -> EnergyChoice {
        match self {
            EnergyArg::LogLength => EnergyChoice::LogLength,
            EnergyArg::LogScale => EnergyChoice::LogScale,
            EnergyArg::QuadraticSymDirichlet => EnergyChoice::QuadraticSymDirichlet,
            EnergyArg::SymDirichlet => EnergyChoice::SymDirichlet,
            EnergyArg::PNorm => EnergyChoice::PNorm { p: power },
        }
    }

    fn label(self) -> &'static str {
        match self {
            EnergyArg::LogLength => "log_length",
            EnergyArg::LogScale => "log_scale",
            EnergyArg::QuadraticSymDirichlet => "quadratic_sym_dirichlet",
            EnergyArg::SymDirichlet => "sym_dirichlet",
            EnergyArg::PNorm => "p_norm",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum DirectionArg {
    /// Projected gradient descent
    ProjectedGradient,
    /// Projected Newton descent
    ProjectedNewton,
}

impl From<DirectionArg> for DirectionChoice {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::ProjectedGradient => DirectionChoice::ProjectedGradient,
            DirectionArg::ProjectedNewton => DirectionChoice::ProjectedNewton,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Optimize {
            mesh,
            cones,
            energy,
            power,
            direction,
            num_iter,
            use_discrete_metric,
            use_free_cones,
            output,
        } => cmd_optimize(
            &mesh,
            &cones,
            energy,
            power,
            direction,
            num_iter,
            use_discrete_metric,
            use_free_cones,
            &output,
        ),
        Commands::PlotEnergy {
            mesh,
            cones,
            energy,
            power,
            range,
            num_steps,
            output,
        } => cmd_plot_energy(&mesh, &cones, energy, power, range, num_steps, &output),
    }
}

/// Load the mesh and cone angles and build the initial metric.
fn load_initial_metric(
    mesh_path: &PathBuf,
    cones_path: &PathBuf,
    use_free_cones: bool,
    mode: MetricMode,
    proj_params: &ProjectionParameters,
) -> anyhow::Result<(ConeMetric, Vec<usize>)> {
    info!("loading mesh at {}", mesh_path.display());
    let (positions, faces) =
        io::read_obj(mesh_path).with_context(|| format!("reading {}", mesh_path.display()))?;

    info!("using cone angles at {}", cones_path.display());
    let raw_angles = io::read_scalar_list(cones_path)
        .with_context(|| format!("reading {}", cones_path.display()))?;
    let target_angles = cones::correct_cone_angles(&raw_angles, cones::DEFAULT_CONE_EPSILON);

    let free_cones = if use_free_cones {
        cones::find_cone_vertices(&target_angles, cones::DEFAULT_CONE_EPSILON)
    } else {
        Vec::new()
    };

    let (metric, vtx_reindex) = initial_cone_metric::<u32>(
        &positions,
        &faces,
        &target_angles,
        &free_cones,
        mode,
        proj_params.initial_ptolemy,
    )
    .context("building initial cone metric")?;
    Ok((metric, vtx_reindex))
}

#[allow(clippy::too_many_arguments)]
fn cmd_optimize(
    mesh: &PathBuf,
    cones_path: &PathBuf,
    energy: EnergyArg,
    power: f64,
    direction: DirectionArg,
    num_iter: usize,
    use_discrete_metric: bool,
    use_free_cones: bool,
    output: &PathBuf,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(output)?;

    let (mode, proj_params) = if use_discrete_metric {
        (MetricMode::DiscreteLength, ProjectionParameters::discrete_metric())
    } else {
        (MetricMode::Penner, ProjectionParameters::default())
    };
    let (metric, _vtx_reindex) =
        load_initial_metric(mesh, cones_path, use_free_cones, mode, &proj_params)?;

    let opt_energy = generate_energy(&metric, energy.to_choice(power))?;
    let opt_params = OptimizationParameters::default()
        .with_direction(direction.into())
        .with_num_iterations(num_iter)
        .with_output_dir(output.clone());

    let result = optimize_metric(&metric, opt_energy.as_ref(), &proj_params, &opt_params)?;
    info!(
        iterations = result.iterations,
        status = ?result.status,
        "optimization finished"
    );

    let coords_path = output.join("optimized_metric_coords");
    io::write_vector(&coords_path, result.metric.reduced_metric_coordinates())?;
    info!("wrote optimized metric coordinates to {}", coords_path.display());
    Ok(())
}

fn cmd_plot_energy(
    mesh: &PathBuf,
    cones_path: &PathBuf,
    energy: EnergyArg,
    power: f64,
    range: f64,
    num_steps: usize,
    output: &PathBuf,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(output)?;

    let proj_params = ProjectionParameters::default();
    let (metric, _vtx_reindex) =
        load_initial_metric(mesh, cones_path, false, MetricMode::Penner, &proj_params)?;

    let shear = compute_shear_basis(&metric);
    let domain = compute_optimization_domain(&metric, &shear)?;
    info!(
        domain = domain.domain.ncols(),
        codomain = domain.codomain.ncols(),
        "plotting energy over shear coordinates"
    );

    let opt_energy = generate_energy(&metric, energy.to_choice(power))?;
    let options = GridOptions { num_steps, range };
    let grid = sample_energy_grid(&metric, opt_energy.as_ref(), &domain, &options, &proj_params)?;

    let grid_path = output.join(format!("energy_grid_{}_range_{}", energy.label(), range));
    io::write_matrix(&grid_path, &grid)?;
    info!("wrote energy grid to {}", grid_path.display());
    Ok(())
}
