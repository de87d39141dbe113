use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use common::engine::read_records_from_path;
use common::{
    default_pipeline, Dag, ErrorResponse, Evaluation, Evaluator, Inputs, PipelineSpec, RunInfo,
    RunLog, RunRequest, RunStatus, SimConfig, SimInfo, SimRequest, StepResponse,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::env;
use tracing::debug;

/// - En Docker: MASTER_URL=http://server:8080
/// - Local: default http://localhost:8080
fn server_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Debug, Parser)]
#[command(name = "client")]
#[command(about = "CLI para correr y simular pipelines map/filter/reduceByKey")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Evalúa un pipeline localmente, sin server
    Run {
        #[arg(value_name = "PIPELINE_JSON")]
        file: String,

        /// Entrada inicial para un nodo, ej: --input read=data/fruits.csv
        #[arg(long = "input", value_name = "NODO=RUTA")]
        inputs: Vec<String>,

        /// Imprime el trace completo en JSON
        #[arg(long)]
        json: bool,
    },
    /// Valida el DAG y muestra el orden de ejecución
    Validate {
        #[arg(value_name = "PIPELINE_JSON")]
        file: String,
    },
    /// Imprime el pipeline por defecto (read -> map1 -> filter1 -> reduce1 -> output)
    Template,
    /// Envía un pipeline al server para correrlo completo
    Submit {
        #[arg(value_name = "PIPELINE_JSON")]
        file: String,

        #[arg(long)]
        name: Option<String>,
    },
    /// Consulta una corrida
    Status {
        #[arg(value_name = "RUN_ID")]
        id: String,
    },
    /// Log paso a paso de una corrida
    Log {
        #[arg(value_name = "RUN_ID")]
        id: String,
    },
    /// Abre una simulación paso a paso en el server
    SimStart {
        #[arg(value_name = "PIPELINE_JSON")]
        file: String,
    },
    /// Avanza una simulación un nodo
    Step {
        #[arg(value_name = "SIM_ID")]
        id: String,
    },
    /// Vuelve una simulación al paso 0
    Reset {
        #[arg(value_name = "SIM_ID")]
        id: String,
    },
}

pub async fn run() -> Result<()> {
    execute(Cli::parse()).await
}

async fn execute(cli: Cli) -> Result<()> {
    let client = Client::new();
    let base_url = server_base_url();

    match cli.command {
        Commands::Run { file, inputs, json } => {
            let inputs = load_inputs(&inputs)?;
            let spec = PipelineSpec::from_path(&file)
                .with_context(|| format!("no se pudo leer el pipeline {file}"))?;
            let eval = run_local(spec, inputs, SimConfig::from_env())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&eval.trace)?);
            } else {
                print_evaluation(&eval);
            }
        }

        Commands::Validate { file } => {
            let dag = Dag::from_path(&file)
                .with_context(|| format!("pipeline inválido: {file}"))?;
            let order = dag.topological_order()?;
            println!("DAG válido ({} nodos)", dag.len());
            println!("  orden: {}", order.join(" -> "));
        }

        Commands::Template => {
            println!("{}", serde_json::to_string_pretty(&default_pipeline())?);
        }

        Commands::Submit { file, name } => {
            let pipeline = PipelineSpec::from_path(&file)
                .with_context(|| format!("no se pudo leer el pipeline {file}"))?;
            let req = RunRequest {
                name,
                pipeline,
                inputs: Inputs::new(),
            };

            let url = format!("{}/api/v1/runs", base_url);
            let resp = client.post(&url).json(&req).send().await?;
            let run: RunInfo = read_json(resp).await?;
            print_run(&run);
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/runs/{}", base_url, id);
            let resp = client.get(&url).send().await?;
            let run: RunInfo = read_json(resp).await?;
            print_run(&run);
        }

        Commands::Log { id } => {
            let url = format!("{}/api/v1/runs/{id}/log", base_url);
            let resp = client.get(&url).send().await?;
            let log: RunLog = read_json(resp).await?;
            println!("Log de la corrida {}:", log.run_id);
            for line in log.lines {
                println!("  {line}");
            }
        }

        Commands::SimStart { file } => {
            let pipeline = PipelineSpec::from_path(&file)
                .with_context(|| format!("no se pudo leer el pipeline {file}"))?;
            let req = SimRequest {
                pipeline,
                inputs: Inputs::new(),
            };

            let url = format!("{}/api/v1/sims", base_url);
            let resp = client.post(&url).json(&req).send().await?;
            let sim: SimInfo = read_json(resp).await?;
            println!("Simulación creada: {}", sim.id);
            print_sim(&sim);
        }

        Commands::Step { id } => {
            let url = format!("{}/api/v1/sims/{id}/step", base_url);
            let resp = client.post(&url).send().await?;
            let step: StepResponse = read_json(resp).await?;
            match &step.entry {
                Some(e) => println!("{}", e.message),
                None => println!("La simulación ya terminó."),
            }
            print_sim(&step.sim);
        }

        Commands::Reset { id } => {
            let url = format!("{}/api/v1/sims/{id}/reset", base_url);
            let resp = client.post(&url).send().await?;
            let sim: SimInfo = read_json(resp).await?;
            println!("Simulación {} reiniciada.", sim.id);
            print_sim(&sim);
        }
    }

    Ok(())
}

/// Parsea `NODO=RUTA`.
fn parse_input(arg: &str) -> Result<(String, String)> {
    match arg.split_once('=') {
        Some((node, path)) if !node.trim().is_empty() && !path.trim().is_empty() => {
            Ok((node.trim().to_string(), path.trim().to_string()))
        }
        _ => bail!("--input debe tener la forma NODO=RUTA, se recibió '{arg}'"),
    }
}

fn load_inputs(args: &[String]) -> Result<Inputs> {
    let mut inputs = Inputs::new();
    for arg in args {
        let (node, path) = parse_input(arg)?;
        let records = read_records_from_path(&path)
            .with_context(|| format!("no se pudo leer la entrada de '{node}' ({path})"))?;
        debug!("entrada {}: {} registros desde {}", node, records.len(), path);
        inputs.insert(node, records);
    }
    Ok(inputs)
}

fn run_local(spec: PipelineSpec, inputs: Inputs, config: SimConfig) -> Result<Evaluation> {
    Ok(Evaluator::new(config).evaluate_spec(spec, inputs)?)
}

/// Decodifica la respuesta o convierte el cuerpo de error del server.
async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let msg = match resp.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => "sin detalle".to_string(),
    };
    Err(anyhow!("el server respondió {status}: {msg}"))
}

fn print_evaluation(eval: &Evaluation) {
    println!("Log:");
    for line in eval.trace.log_lines() {
        println!("  {line}");
    }
    println!("Salida final ({} registros):", eval.final_output.len());
    for r in &eval.final_output {
        println!("  {r}");
    }
    let m = &eval.metrics;
    println!("Métricas:");
    println!("  registros    : {}", m.total_records);
    println!("  claves únicas: {}", m.unique_keys);
    match &m.max_value {
        Some(v) => println!("  valor máximo : {v}"),
        None => println!("  valor máximo : (sin datos)"),
    }
}

fn print_run(run: &RunInfo) {
    println!("Corrida:");
    println!("  id: {}", run.id);
    println!("  nombre: {}", run.name);
    println!("  estado: {:?}", run.status);
    if !run.order.is_empty() {
        println!("  orden: {}", run.order.join(" -> "));
    }
    if run.status == RunStatus::Failed {
        if let Some(err) = &run.error {
            println!("  error: {err}");
        }
        return;
    }
    for s in &run.node_stats {
        println!("    {:<12} {:<12} {} -> {}", s.node_id, s.op, s.input_len, s.output_len);
    }
    println!("  salida: {}", serde_json::Value::Array(run.output.clone()));
    if let Some(m) = &run.metrics {
        println!(
            "  métricas: registros={}, claves únicas={}, máximo={}",
            m.total_records,
            m.unique_keys,
            m.max_value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    println!("  finalizado: {}", run.finished_at);
}

fn print_sim(sim: &SimInfo) {
    println!("  paso: {}/{}", sim.stage, sim.order.len());
    match &sim.current {
        Some(node) => println!("  próximo nodo: {node}"),
        None => println!("  terminada"),
    }
    if let Some(out) = &sim.last_output {
        println!("  última salida: {}", serde_json::Value::Array(out.clone()));
    }
    if let Some(err) = &sim.last_error {
        println!("  error: {err}");
    }
}
