use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};

use crate::marking::guillotine;
use crate::marking::order_key::compare_question_numbers;
use crate::schemas::marking::{MarkingTask, QuestionResult, Score};
use crate::services::ai_marking::MarkingClient;

#[derive(Debug, Default)]
pub(crate) struct ExecutorOutcome {
    pub(crate) results: Vec<QuestionResult>,
    pub(crate) failed: usize,
}

enum TaskOutcome {
    Marked(Box<QuestionResult>),
    Failed,
}

type TaskQueue = Arc<Mutex<VecDeque<MarkingTask>>>;

/// Runs every task through at most `concurrency` workers sharing one FIFO queue.
///
/// A failing task is logged and dropped; it never stops sibling tasks. Results come back sorted
/// by question number regardless of completion order.
pub(crate) async fn execute(
    tasks: Vec<MarkingTask>,
    client: Arc<dyn MarkingClient>,
    concurrency: usize,
) -> ExecutorOutcome {
    if tasks.is_empty() {
        return ExecutorOutcome::default();
    }

    let worker_count = concurrency.max(1).min(tasks.len());
    let total = tasks.len();
    let queue: TaskQueue = Arc::new(Mutex::new(tasks.into_iter().collect()));
    let (tx, mut rx) = mpsc::unbounded_channel::<TaskOutcome>();

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        handles.push(tokio::spawn(worker(queue.clone(), client.clone(), tx.clone())));
    }
    drop(tx);

    let mut outcome = ExecutorOutcome::default();
    while let Some(task_outcome) = rx.recv().await {
        match task_outcome {
            TaskOutcome::Marked(result) => outcome.results.push(*result),
            TaskOutcome::Failed => outcome.failed += 1,
        }
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Marking worker join failed");
        }
    }

    // A panicking worker loses its in-flight task without reporting it.
    outcome.failed = total - outcome.results.len();
    outcome.results.sort_by(|a, b| compare_question_numbers(&a.question_number, &b.question_number));
    tracing::info!(
        tasks = total,
        marked = outcome.results.len(),
        failed = outcome.failed,
        workers = worker_count,
        "Marking executor drained"
    );
    outcome
}

async fn worker(queue: TaskQueue, client: Arc<dyn MarkingClient>, tx: mpsc::UnboundedSender<TaskOutcome>) {
    loop {
        let Some(task) = queue.lock().await.pop_front() else {
            break;
        };

        let question_number = task.question_number.clone();
        let timer = Instant::now();
        metrics::gauge!("marking_tasks_active").increment(1.0);
        let result = mark_task(client.as_ref(), task).await;
        metrics::gauge!("marking_tasks_active").decrement(1.0);
        metrics::histogram!("marking_task_duration_seconds").record(timer.elapsed().as_secs_f64());

        let task_outcome = match result {
            Ok(result) => {
                metrics::counter!("marking_tasks_total", "status" => "success").increment(1);
                TaskOutcome::Marked(Box::new(result))
            }
            Err(err) => {
                metrics::counter!("marking_tasks_total", "status" => "failed").increment(1);
                tracing::error!(question_number = %question_number, error = %err, "Marking task failed");
                TaskOutcome::Failed
            }
        };

        if tx.send(task_outcome).is_err() {
            tracing::warn!(question_number = %question_number, "Marking result receiver dropped");
            break;
        }
    }
}

/// Marks one task, then fills in context the service left out and enforces the mark budget.
pub(crate) async fn mark_task(client: &dyn MarkingClient, task: MarkingTask) -> Result<QuestionResult> {
    let response = client.mark(&task).await?;

    let question_text = response
        .question_text
        .filter(|text| !text.trim().is_empty())
        .unwrap_or(task.question_text);
    let student_work = response
        .student_work
        .filter(|work| !work.trim().is_empty())
        .unwrap_or(task.student_work);

    let result = QuestionResult {
        question_number: task.question_number,
        question_text,
        score: Score::new(response.score.awarded_marks, response.score.total_marks),
        annotations: response.annotations,
        student_work,
        feedback: response.feedback,
        source_pages: task.source_pages,
        usage_tokens: response.usage_tokens,
        trimmed_marks: 0,
    };

    Ok(guillotine::enforce(result, task.scheme.as_ref()))
}
