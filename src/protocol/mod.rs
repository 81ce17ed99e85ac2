use std::sync::Arc;

use anyhow::Result;

use crate::metrics::sampler::SharedSource;
use crate::metrics::store::MetricStore;
use crate::registry::{Registry, RegistryError};

/// Default number of history entries returned when a client omits the limit.
const DEFAULT_HISTORY_LIMIT: usize = 50;

const HELP_TEXT: &str = "Comandos disponibles:\n\
CREAR|<nombre>|<prioridad> - Crea un nuevo proceso.\n\
LISTAR - Lista todos los procesos.\n\
ELIMINAR|<id> - Elimina un proceso por su ID.\n\
MODIFICAR|<id>|<campo>|<valor> - Modifica un campo de un proceso.\n\
METRICAS - Obtiene métricas actuales del sistema.\n\
HISTORIAL_CPU|<limite> - Obtiene historial de CPU.\n\
HISTORIAL_MEMORIA|<limite> - Obtiene historial de memoria.\n\
HISTORIAL_DISCO|<limite> - Obtiene historial de disco.\n\
HISTORIAL_RED|<limite> - Obtiene historial de red.\n\
PROCESOS_REALES - Lista procesos reales del sistema.\n\
INFO_SISTEMA - Información general del sistema.\n\
TODAS_METRICAS - Todas las métricas en formato JSON.\n\
SALIR - Desconecta del servidor.";

/// Tagged response delivered back over the wire as a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Success with a human-readable message: `OK|...`
    Ok(String),
    /// Failure with a human-readable reason: `ERROR|...`
    Error(String),
    /// Success with serialized data: `DATOS|...`
    Data(String),
    /// Disconnect signal; the server closes after delivering it: `SALIR|...`
    Quit(String),
}

impl Response {
    pub fn render(&self) -> String {
        match self {
            Response::Ok(msg) => format!("OK|{msg}"),
            Response::Error(msg) => format!("ERROR|{msg}"),
            Response::Data(payload) => format!("DATOS|{payload}"),
            Response::Quit(msg) => format!("SALIR|{msg}"),
        }
    }

    pub fn is_quit(&self) -> bool {
        matches!(self, Response::Quit(_))
    }
}

/// Maps one command line to a handler invocation and a response.
///
/// `dispatch` never propagates a fault to the caller: the fallible inner
/// path is wrapped once at this boundary and converted to an `ERROR|`
/// response.
pub struct Dispatcher {
    store: Arc<MetricStore>,
    registry: Arc<Registry>,
    source: SharedSource,
}

impl Dispatcher {
    pub fn new(store: Arc<MetricStore>, registry: Arc<Registry>, source: SharedSource) -> Self {
        Self {
            store,
            registry,
            source,
        }
    }

    pub fn dispatch(&self, line: &str) -> Response {
        match self.try_dispatch(line) {
            Ok(response) => response,
            Err(e) => Response::Error(format!("Error inesperado en el servidor: {e}")),
        }
    }

    fn try_dispatch(&self, line: &str) -> Result<Response> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Response::Error("Comando vacío.".to_string()));
        }

        let parts: Vec<&str> = line.split('|').collect();
        let action = parts[0].trim().to_lowercase();

        // Arity is validated before any handler runs.
        match action.as_str() {
            "crear" => {
                if parts.len() != 3 {
                    return Ok(usage_error("CREAR", "CREAR|nombre|prioridad"));
                }
                Ok(registry_response(self.registry.create(parts[1], parts[2])))
            }

            "listar" => {
                if parts.len() != 1 {
                    return Ok(usage_error("LISTAR", "LISTAR"));
                }
                Ok(Response::Data(serde_json::to_string(&self.registry.list())?))
            }

            "eliminar" => {
                if parts.len() != 2 {
                    return Ok(usage_error("ELIMINAR", "ELIMINAR|id"));
                }
                Ok(registry_response(self.registry.delete(parts[1])))
            }

            "modificar" => {
                if parts.len() != 4 {
                    return Ok(usage_error("MODIFICAR", "MODIFICAR|id|campo|valor"));
                }
                Ok(registry_response(
                    self.registry.modify(parts[1], parts[2], parts[3]),
                ))
            }

            "ayuda" => {
                if parts.len() != 1 {
                    return Ok(usage_error("AYUDA", "AYUDA"));
                }
                Ok(Response::Data(HELP_TEXT.to_string()))
            }

            "metricas" => {
                if parts.len() != 1 {
                    return Ok(usage_error("METRICAS", "METRICAS"));
                }
                let snapshot = self.store.current_snapshot();
                Ok(Response::Data(serde_json::to_string(&snapshot)?))
            }

            "historial_cpu" => self.history(&parts, "HISTORIAL_CPU", |store, limit| {
                serde_json::to_string(&store.cpu_history(Some(limit)))
            }),

            "historial_memoria" => self.history(&parts, "HISTORIAL_MEMORIA", |store, limit| {
                serde_json::to_string(&store.memory_history(Some(limit)))
            }),

            "historial_disco" => self.history(&parts, "HISTORIAL_DISCO", |store, limit| {
                serde_json::to_string(&store.disk_history(Some(limit)))
            }),

            "historial_red" => self.history(&parts, "HISTORIAL_RED", |store, limit| {
                serde_json::to_string(&store.network_history(Some(limit)))
            }),

            "procesos_reales" => {
                if parts.len() != 1 {
                    return Ok(usage_error("PROCESOS_REALES", "PROCESOS_REALES"));
                }
                let processes = self.source.lock().real_processes()?;
                Ok(Response::Data(serde_json::to_string(&processes)?))
            }

            "info_sistema" => {
                if parts.len() != 1 {
                    return Ok(usage_error("INFO_SISTEMA", "INFO_SISTEMA"));
                }
                let info = self.source.lock().system_info()?;
                Ok(Response::Data(serde_json::to_string(&info)?))
            }

            "todas_metricas" => {
                if parts.len() != 1 {
                    return Ok(usage_error("TODAS_METRICAS", "TODAS_METRICAS"));
                }
                Ok(Response::Data(serde_json::to_string(
                    &self.store.all_metrics_document(),
                )?))
            }

            "salir" => {
                if parts.len() != 1 {
                    return Ok(usage_error("SALIR", "SALIR"));
                }
                Ok(Response::Quit("Desconectando.".to_string()))
            }

            _ => Ok(Response::Error("Comando no reconocido.".to_string())),
        }
    }

    /// Shared shape of the four HISTORIAL_* commands: optional numeric
    /// limit, parsed before touching the store.
    fn history(
        &self,
        parts: &[&str],
        keyword: &str,
        serialize: impl Fn(&MetricStore, usize) -> serde_json::Result<String>,
    ) -> Result<Response> {
        if parts.len() > 2 {
            return Ok(usage_error(keyword, &format!("{keyword}|[limite]")));
        }

        let limit = match parts.get(1) {
            None => DEFAULT_HISTORY_LIMIT,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(limit) => limit,
                Err(_) => {
                    return Ok(Response::Error(format!(
                        "Límite inválido: '{}'. Debe ser un número entero.",
                        raw.trim()
                    )))
                }
            },
        };

        Ok(Response::Data(serialize(&self.store, limit)?))
    }
}

fn usage_error(keyword: &str, usage: &str) -> Response {
    Response::Error(format!(
        "Argumentos inválidos para {keyword}. Se necesita: {usage}"
    ))
}

fn registry_response(result: Result<String, RegistryError>) -> Response {
    match result {
        Ok(msg) => Response::Ok(msg),
        Err(e) => Response::Error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use parking_lot::Mutex;

    use super::*;
    use crate::metrics::source::{
        MetricSource, NetworkTotals, ProcessSample, RawSample, SystemInfo,
    };
    use crate::metrics::store::TickPoints;
    use crate::metrics::{HistoryPoint, NetworkPoint, Snapshot};

    struct FakeSource {
        fail_system_info: bool,
    }

    impl MetricSource for FakeSource {
        fn sample(&mut self) -> Result<RawSample> {
            Ok(RawSample::default())
        }

        fn network_totals(&mut self) -> Result<NetworkTotals> {
            Ok(NetworkTotals::default())
        }

        fn real_processes(&mut self) -> Result<Vec<ProcessSample>> {
            Ok(vec![ProcessSample {
                pid: 42,
                name: "fake".to_string(),
                status: "running".to_string(),
                cpu_percent: 1.5,
                memory_percent: 0.5,
            }])
        }

        fn system_info(&mut self) -> Result<SystemInfo> {
            if self.fail_system_info {
                bail!("fuente no disponible");
            }
            Ok(SystemInfo {
                platform: "linux".to_string(),
                boot_time: "2024-01-01T00:00:00.000000".to_string(),
                cpu_count_physical: 4,
                cpu_count_logical: 8,
                memory_total_gb: 16.0,
                disk_total_gb: 256.0,
            })
        }
    }

    fn dispatcher() -> Dispatcher {
        dispatcher_with(FakeSource {
            fail_system_info: false,
        })
    }

    fn dispatcher_with(source: FakeSource) -> Dispatcher {
        Dispatcher::new(
            Arc::new(MetricStore::new(100)),
            Arc::new(Registry::new()),
            Arc::new(Mutex::new(source)),
        )
    }

    fn seed_ticks(store: &MetricStore, count: usize) {
        for i in 0..count {
            let ts = format!("t{i}");
            store.replace_tick(
                Snapshot {
                    cpu_percent: i as f64,
                    timestamp: ts.clone(),
                    ..Snapshot::default()
                },
                TickPoints {
                    cpu: HistoryPoint {
                        value: i as f64,
                        timestamp: ts.clone(),
                    },
                    memory: HistoryPoint {
                        value: 0.0,
                        timestamp: ts.clone(),
                    },
                    disk: HistoryPoint {
                        value: 0.0,
                        timestamp: ts.clone(),
                    },
                    network: NetworkPoint {
                        sent: 0,
                        recv: 0,
                        timestamp: ts.clone(),
                    },
                    process_count: HistoryPoint {
                        value: 0.0,
                        timestamp: ts,
                    },
                },
            );
        }
    }

    #[test]
    fn test_render_tags() {
        assert_eq!(Response::Ok("hecho".into()).render(), "OK|hecho");
        assert_eq!(Response::Error("mal".into()).render(), "ERROR|mal");
        assert_eq!(Response::Data("[]".into()).render(), "DATOS|[]");
        assert_eq!(Response::Quit("adiós".into()).render(), "SALIR|adiós");
    }

    #[test]
    fn test_unknown_command_any_casing() {
        let d = dispatcher();
        for line in ["FOO", "foo", "FoO|x"] {
            assert_eq!(
                d.dispatch(line),
                Response::Error("Comando no reconocido.".to_string())
            );
        }
    }

    #[test]
    fn test_empty_command() {
        let d = dispatcher();
        assert_eq!(
            d.dispatch("   "),
            Response::Error("Comando vacío.".to_string())
        );
    }

    #[test]
    fn test_crear_success_and_case_insensitive() {
        let d = dispatcher();
        let response = d.dispatch("crear|web|5");
        assert!(matches!(&response, Response::Ok(m) if m.contains("'web'")));

        let records = d.registry.list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "web");
        assert_eq!(records[0].priority, 5);
    }

    #[test]
    fn test_crear_registry_rejection_surfaces_as_error() {
        let d = dispatcher();
        let response = d.dispatch("CREAR|web|muy-alta");
        assert!(matches!(&response, Response::Error(m) if m.contains("Prioridad inválida")));
        assert!(d.registry.list().is_empty());
    }

    #[test]
    fn test_arity_mismatch_never_invokes_handler() {
        let d = dispatcher();
        let cases = [
            "CREAR|solo-nombre",
            "CREAR|a|b|c",
            "ELIMINAR",
            "ELIMINAR|1|extra",
            "MODIFICAR|1|nombre",
            "LISTAR|extra",
            "METRICAS|extra",
            "SALIR|extra",
            "TODAS_METRICAS|x",
        ];
        for line in cases {
            let response = d.dispatch(line);
            assert!(
                matches!(&response, Response::Error(m) if m.starts_with("Argumentos inválidos")),
                "{line} should fail arity: {response:?}"
            );
        }
        assert!(d.registry.list().is_empty());
    }

    #[test]
    fn test_historial_cpu_default_limit_is_50() {
        let d = dispatcher();
        seed_ticks(&d.store, 60);

        let Response::Data(payload) = d.dispatch("HISTORIAL_CPU") else {
            panic!("expected data response");
        };
        let entries: Vec<HistoryPoint> = serde_json::from_str(&payload).expect("json");
        assert_eq!(entries.len(), 50);
        // Suffix of the retained series, chronological.
        assert_eq!(entries[0].value, 10.0);
        assert_eq!(entries[49].value, 59.0);
    }

    #[test]
    fn test_historial_explicit_limit() {
        let d = dispatcher();
        seed_ticks(&d.store, 20);

        let Response::Data(payload) = d.dispatch("HISTORIAL_CPU|5") else {
            panic!("expected data response");
        };
        let entries: Vec<HistoryPoint> = serde_json::from_str(&payload).expect("json");
        let values: Vec<f64> = entries.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![15.0, 16.0, 17.0, 18.0, 19.0]);
    }

    #[test]
    fn test_historial_malformed_limit() {
        let d = dispatcher();
        seed_ticks(&d.store, 5);

        let response = d.dispatch("HISTORIAL_MEMORIA|muchos");
        assert!(matches!(&response, Response::Error(m) if m.contains("Límite inválido")));
    }

    #[test]
    fn test_historial_red_returns_network_points() {
        let d = dispatcher();
        seed_ticks(&d.store, 3);

        let Response::Data(payload) = d.dispatch("HISTORIAL_RED|2") else {
            panic!("expected data response");
        };
        let entries: Vec<NetworkPoint> = serde_json::from_str(&payload).expect("json");
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_metricas_serializes_snapshot() {
        let d = dispatcher();
        seed_ticks(&d.store, 3);

        let Response::Data(payload) = d.dispatch("METRICAS") else {
            panic!("expected data response");
        };
        let value: serde_json::Value = serde_json::from_str(&payload).expect("json");
        assert_eq!(value["cpu_percent"], 2.0);
        assert_eq!(value["timestamp"], "t2");
    }

    #[test]
    fn test_procesos_reales_and_info_sistema() {
        let d = dispatcher();

        let Response::Data(payload) = d.dispatch("PROCESOS_REALES") else {
            panic!("expected data response");
        };
        assert!(payload.contains("\"pid\":42"));

        let Response::Data(payload) = d.dispatch("INFO_SISTEMA") else {
            panic!("expected data response");
        };
        assert!(payload.contains("\"cpu_count_logical\":8"));
    }

    #[test]
    fn test_todas_metricas_document_shape() {
        let d = dispatcher();
        seed_ticks(&d.store, 4);

        let Response::Data(payload) = d.dispatch("TODAS_METRICAS") else {
            panic!("expected data response");
        };
        let doc: serde_json::Value = serde_json::from_str(&payload).expect("json");
        assert!(doc.get("current").is_some());
        assert_eq!(doc["history"]["cpu"].as_array().expect("array").len(), 4);
    }

    #[test]
    fn test_salir_signals_quit() {
        let d = dispatcher();
        let response = d.dispatch("salir");
        assert!(response.is_quit());
        assert_eq!(response.render(), "SALIR|Desconectando.");
    }

    #[test]
    fn test_ayuda_lists_commands() {
        let d = dispatcher();
        let Response::Data(text) = d.dispatch("AYUDA") else {
            panic!("expected data response");
        };
        assert!(text.contains("CREAR|<nombre>|<prioridad>"));
        assert!(text.contains("SALIR"));
    }

    #[test]
    fn test_handler_fault_caught_at_boundary() {
        let d = dispatcher_with(FakeSource {
            fail_system_info: true,
        });

        let response = d.dispatch("INFO_SISTEMA");
        assert!(
            matches!(&response, Response::Error(m)
                if m.starts_with("Error inesperado en el servidor:")
                    && m.contains("fuente no disponible")),
            "got {response:?}"
        );
    }
}
